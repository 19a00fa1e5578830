use crate::validation::Verdict;

/// Combines several verdicts into one.
///
/// Zero or one verdicts are returned unchanged. Otherwise the rollup is valid
/// only if every input is valid, and its message lists each input's message
/// (annotated with its mode and digest) in input order, after `prefix`.
pub fn reduce(mut verdicts: Vec<Verdict>, prefix: &str) -> Verdict {
    match verdicts.len() {
        0 => Verdict::default(),
        1 => verdicts.remove(0),
        _ => {
            let is_valid = verdicts.iter().all(|v| v.is_valid);
            let parts = verdicts.iter().map(describe).collect::<Vec<_>>();
            Verdict {
                mode: None,
                is_valid,
                message: format!("{prefix} [ {} ]", parts.join("; ")),
                image_digest: String::new(),
            }
        }
    }
}

fn describe(verdict: &Verdict) -> String {
    let details = verdict
        .mode
        .as_ref()
        .map(|m| m.as_str())
        .into_iter()
        .chain(Some(verdict.image_digest.as_str()))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    if details.is_empty() {
        return verdict.message.clone();
    }
    format!("{}({})", verdict.message, details.join(","))
}
