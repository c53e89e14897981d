//! On-disk tape layout.

use super::match_rule::MatchRule;
use super::mode::TapeMode;
use super::types::Interaction;
use crate::error::TapeError;
use serde::{Deserialize, Serialize};

/// Persisted form of a tape.
///
/// ```yaml
/// name: user service
/// mode: read_write
/// match_rule:
///   method: true
///   uri: true
///   query: true
///   body: false
/// interactions:
/// - recorded: 2024-05-01T10:00:00Z
///   request:
///     method: GET
///     uri: http://api.test/status
///   response:
///     status: 200
///     body: ok
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeFile {
    pub name: String,
    #[serde(default)]
    pub mode: TapeMode,
    #[serde(default)]
    pub match_rule: MatchRule,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl TapeFile {
    pub fn to_yaml(&self) -> Result<String, TapeError> {
        serde_yaml::to_string(self).map_err(|e| TapeError::Format(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self, TapeError> {
        serde_yaml::from_str(content).map_err(|e| TapeError::Format(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::types::{RecordedRequest, RecordedResponse};

    fn sample() -> TapeFile {
        TapeFile {
            name: "sample".to_string(),
            mode: TapeMode::ReadOnly,
            match_rule: MatchRule::default().with_header("accept"),
            interactions: vec![
                Interaction::new(
                    RecordedRequest::new("GET", "http://api.test/status")
                        .with_header("accept", "text/plain"),
                    RecordedResponse::new(200)
                        .with_header("content-type", "text/plain")
                        .with_header("set-cookie", "a=1")
                        .with_header("set-cookie", "b=2")
                        .with_body("ok"),
                ),
                Interaction::new(
                    RecordedRequest::new("POST", "http://api.test/blob").with_body(vec![0u8, 159, 146]),
                    RecordedResponse::new(201),
                ),
            ],
        }
    }

    #[test]
    fn test_reserialization_is_byte_identical() {
        let yaml = sample().to_yaml().unwrap();
        let parsed = TapeFile::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, sample_with_times(&parsed));
        assert_eq!(parsed.to_yaml().unwrap(), yaml);
    }

    // Timestamps are taken at construction, so compare with the parsed ones.
    fn sample_with_times(parsed: &TapeFile) -> TapeFile {
        let mut expected = sample();
        for (e, p) in expected.interactions.iter_mut().zip(&parsed.interactions) {
            e.recorded = p.recorded;
        }
        expected
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let file = TapeFile::from_yaml("name: bare\n").unwrap();
        assert_eq!(file.mode, TapeMode::ReadWrite);
        assert_eq!(file.match_rule, MatchRule::default());
        assert!(file.interactions.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_format_error() {
        let err = TapeFile::from_yaml("interactions: [").unwrap_err();
        assert!(matches!(err, TapeError::Format(_)));
    }
}
