use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use ark_format::DetectedFormat;
use ark_types::SipId;

/// What a validator sees of a SIP.
#[derive(Clone, Copy, Debug)]
pub struct SipContent<'a> {
    pub sip_id: &'a SipId,
    pub source: &'a Path,
    pub formats: &'a BTreeMap<String, DetectedFormat>,
}

/// Outcome of validating one SIP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject { reason: String },
}

impl Verdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.into(),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Pluggable validation step of the ingest pipeline.
#[async_trait]
pub trait SipValidator: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    async fn validate(&self, sip: SipContent<'_>) -> Verdict;
}

/// Structural checks every SIP must pass.
///
/// A SIP must contain at least one file. With `reject_unknown_formats`,
/// every file must also have been identified.
#[derive(Clone, Debug, Default)]
pub struct StructureValidator {
    pub reject_unknown_formats: bool,
}

#[async_trait]
impl SipValidator for StructureValidator {
    fn name(&self) -> &str {
        "structure"
    }

    async fn validate(&self, sip: SipContent<'_>) -> Verdict {
        if sip.formats.is_empty() {
            return Verdict::reject(format!("SIP {} contains no files", sip.sip_id));
        }
        if self.reject_unknown_formats {
            let unknown: Vec<&str> = sip
                .formats
                .iter()
                .filter(|(_, format)| format.is_unknown())
                .map(|(path, _)| path.as_str())
                .collect();
            if !unknown.is_empty() {
                return Verdict::reject(format!("unidentified files: {}", unknown.join(", ")));
            }
        }
        Verdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats(entries: &[(&str, DetectedFormat)]) -> BTreeMap<String, DetectedFormat> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn text() -> DetectedFormat {
        DetectedFormat {
            puid: "x-fmt/111".into(),
            name: "Plain Text File".into(),
            mime: "text/plain".into(),
            basis: ark_format::MatchBasis::Extension,
        }
    }

    #[tokio::test]
    async fn empty_sip_is_rejected() {
        let sip = SipId::new("s").unwrap();
        let empty = BTreeMap::new();
        let verdict = StructureValidator::default()
            .validate(SipContent {
                sip_id: &sip,
                source: Path::new("/in/s"),
                formats: &empty,
            })
            .await;
        assert!(!verdict.is_accept());
    }

    #[tokio::test]
    async fn unknown_formats_only_rejected_when_configured() {
        let sip = SipId::new("s").unwrap();
        let found = formats(&[("a.txt", text()), ("blob", DetectedFormat::unknown())]);
        let content = SipContent {
            sip_id: &sip,
            source: Path::new("/in/s"),
            formats: &found,
        };
        assert!(StructureValidator::default().validate(content).await.is_accept());
        let strict = StructureValidator {
            reject_unknown_formats: true,
        };
        assert_eq!(
            strict.validate(content).await,
            Verdict::reject("unidentified files: blob")
        );
    }
}
