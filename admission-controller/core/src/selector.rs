use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

/// Identifies what a [`ResourceSelector`] is evaluated against.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorType {
    /// The admitted object's own metadata.
    #[serde(rename = "resource", alias = "pod")]
    General,

    /// The metadata of the admitted object's namespace.
    Namespace,

    /// The container image reference.
    Image,
}

/// Matches object metadata or an image reference against a pair of regular
/// expressions.
///
/// Patterns must match the whole candidate string. They are compiled when the
/// selector is built; a pattern that fails to compile is logged then and never
/// matches.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "SelectorConfig")]
pub struct ResourceSelector {
    pub type_: SelectorType,
    key: Pattern,
    value: Pattern,
}

/// The configuration file's representation of a [`ResourceSelector`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectorConfig {
    resource_type: SelectorType,

    /// Unused for image selectors.
    #[serde(default)]
    selector_key_regex: String,

    selector_value_regex: String,
}

#[derive(Clone, Debug)]
struct Pattern {
    source: String,
    regex: Option<Regex>,
}

/// The key pattern that selects on the object's name rather than on its labels
/// and annotations.
const NAME_KEY: &str = "name";

// === impl ResourceSelector ===

impl ResourceSelector {
    pub fn new(
        type_: SelectorType,
        key_pattern: impl Into<String>,
        value_pattern: impl Into<String>,
    ) -> Self {
        let value = Pattern::new(value_pattern.into());
        let key = match type_ {
            // Image selectors never consult the key.
            SelectorType::Image => Pattern::unused(key_pattern.into()),
            SelectorType::General | SelectorType::Namespace => Pattern::new(key_pattern.into()),
        };
        Self { type_, key, value }
    }

    pub fn image(value_pattern: impl Into<String>) -> Self {
        Self::new(SelectorType::Image, "", value_pattern)
    }

    pub fn key_pattern(&self) -> &str {
        &self.key.source
    }

    pub fn value_pattern(&self) -> &str {
        &self.value.source
    }

    /// Returns true if the selector applies to `meta` (for general and
    /// namespace selectors) or to `image` (for image selectors).
    ///
    /// A metadata selector with no metadata to inspect does not match.
    pub fn matches(&self, meta: Option<&ObjectMeta>, image: &str) -> bool {
        match self.type_ {
            SelectorType::Image => self.value.is_match(image),
            SelectorType::General | SelectorType::Namespace => {
                meta.is_some_and(|meta| self.matches_meta(meta))
            }
        }
    }

    fn matches_meta(&self, meta: &ObjectMeta) -> bool {
        if self.key.source.eq_ignore_ascii_case(NAME_KEY) {
            let name = meta.name.as_deref().unwrap_or_default();
            return self.value.is_match(name);
        }

        let (Some(key), Some(value)) = (&self.key.regex, &self.value.regex) else {
            return false;
        };

        meta.labels
            .iter()
            .chain(meta.annotations.iter())
            .flatten()
            .any(|(k, v)| key.is_match(k) && value.is_match(v))
    }
}

impl From<SelectorConfig> for ResourceSelector {
    fn from(config: SelectorConfig) -> Self {
        Self::new(
            config.resource_type,
            config.selector_key_regex,
            config.selector_value_regex,
        )
    }
}

// === impl Pattern ===

impl Pattern {
    fn new(source: String) -> Self {
        let regex = match Regex::new(&format!("^(?:{source})$")) {
            Ok(re) => Some(re),
            Err(error) => {
                warn!(%error, pattern = %source, "Invalid selector pattern");
                None
            }
        };
        Self { source, regex }
    }

    fn unused(source: String) -> Self {
        Self {
            source,
            regex: None,
        }
    }

    fn is_match(&self, candidate: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(candidate))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn meta() -> ObjectMeta {
        ObjectMeta {
            name: Some("web-0".to_string()),
            namespace: Some("apps".to_string()),
            labels: Some(btreemap! {
                "labelkey".to_string() => "labelvalue".to_string(),
                "labelowner".to_string() => "lsometeam".to_string(),
            }),
            annotations: Some(btreemap! {
                "annotationkey".to_string() => "annotationvalue".to_string(),
                "annotationowner".to_string() => "asometeam".to_string(),
            }),
            ..Default::default()
        }
    }

    fn general(key: &str, value: &str) -> ResourceSelector {
        ResourceSelector::new(SelectorType::General, key, value)
    }

    #[test]
    fn matches_labels_and_annotations() {
        let meta = meta();
        for (key, value) in [
            (".*", ".*"),
            ("label.*", ".*"),
            ("labelowner", "lsometeam"),
            ("annotation.*", ".*"),
            ("annotationowner", "asometeam"),
            (".*own.*", ".*team"),
        ] {
            assert!(
                general(key, value).matches(Some(&meta), "alpine"),
                "{key}={value} should match"
            );
        }
    }

    #[test]
    fn requires_full_string_matches() {
        let meta = meta();
        for (key, value) in [
            ("^label$", ".*"),
            ("label", ".*"),
            ("labelowner", "lsome"),
            ("own", ".*team"),
            ("notfound", ".*"),
            (".*", "anotherteam"),
            ("labelowner", "asometeam"),
        ] {
            assert!(
                !general(key, value).matches(Some(&meta), "alpine"),
                "{key}={value} should not match"
            );
        }
    }

    #[test]
    fn name_key_matches_object_name() {
        let meta = meta();
        assert!(general("name", "web-.*").matches(Some(&meta), "alpine"));
        assert!(general("NAME", "web-0").matches(Some(&meta), "alpine"));
        assert!(!general("Name", "db-.*").matches(Some(&meta), "alpine"));

        // Labels and annotations are ignored for name selectors.
        assert!(!general("name", "labelvalue").matches(Some(&meta), "alpine"));
    }

    #[test]
    fn image_selectors_ignore_metadata() {
        let meta = meta();
        let cases = [
            (".*", "alpine", true),
            (".*:latest", "alpine:latest", true),
            (".*:latest", "debian:jessie", false),
            ("alpine", "alpine", true),
            ("alpine", "bad-alpine", false),
        ];
        for (pattern, image, expected) in cases {
            let sel = ResourceSelector::image(pattern);
            assert_eq!(sel.matches(Some(&meta), image), expected, "{pattern} ~ {image}");
            assert_eq!(sel.matches(None, image), expected, "{pattern} ~ {image}");
        }
    }

    #[test]
    fn invalid_patterns_never_match() {
        let meta = meta();
        assert!(!general("(", ".*").matches(Some(&meta), "alpine"));
        assert!(!general(".*", "[").matches(Some(&meta), "alpine"));
        assert!(!general("name", "[").matches(Some(&meta), "alpine"));
        assert!(!ResourceSelector::image("(").matches(None, "alpine"));
    }

    #[test]
    fn patterns_are_compiled_once() {
        let sel = general("label.*", ".*team");
        assert!(sel.key.regex.is_some());
        assert!(sel.value.regex.is_some());

        let sel = general(".*", "[");
        assert!(sel.key.regex.is_some());
        assert!(sel.value.regex.is_none());
        assert_eq!(sel.value_pattern(), "[");

        // The key of an image selector is never compiled.
        let sel = ResourceSelector::new(SelectorType::Image, "(", "alpine");
        assert!(sel.key.regex.is_none());
        assert!(sel.matches(None, "alpine"));

        // Clones compare by source.
        let sel = general("labelowner", "lsometeam");
        let clone = sel.clone();
        assert_eq!(sel, clone);
        assert!(clone.matches(Some(&meta()), "alpine"));
    }

    #[test]
    fn metadata_selectors_require_metadata() {
        let sel = ResourceSelector::new(SelectorType::Namespace, ".*", ".*");
        assert!(!sel.matches(None, "alpine"));
        assert!(!sel.matches(Some(&ObjectMeta::default()), "alpine"));
    }

    #[test]
    fn matching_is_repeatable() {
        let meta = meta();
        let sel = general("labelowner", "lsometeam");
        let first = sel.matches(Some(&meta), "alpine");
        assert!((0..8).all(|_| sel.matches(Some(&meta), "alpine") == first));
    }

    #[test]
    fn deserializes_config_names() {
        let sel: ResourceSelector = serde_yaml::from_str(
            "resourceType: namespace\nselectorKeyRegex: team\nselectorValueRegex: '.*'\n",
        )
        .unwrap();
        assert_eq!(sel, ResourceSelector::new(SelectorType::Namespace, "team", ".*"));

        let sel: ResourceSelector =
            serde_yaml::from_str("resourceType: resource\nselectorValueRegex: x\n").unwrap();
        assert_eq!(sel.type_, SelectorType::General);

        let sel: ResourceSelector =
            serde_yaml::from_str("resourceType: image\nselectorValueRegex: '.*'\n").unwrap();
        assert_eq!(sel, ResourceSelector::image(".*"));
    }
}
