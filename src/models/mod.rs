use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// A file attached to the current upload request. Lives only as long as the request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub buffer: Bytes,
    pub size: usize,
}

impl UploadedFile {
    pub fn new(original_name: impl Into<String>, buffer: Bytes) -> Self {
        let size = buffer.len();
        Self {
            original_name: original_name.into(),
            buffer,
            size,
        }
    }

    /// Original name lowercased, used for extension branching
    pub fn lowercase_name(&self) -> String {
        self.original_name.to_lowercase()
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.lowercase_name().ends_with(ext)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Challenge {
    UploadSize,
    UploadType,
    FileWrite,
    DeprecatedInterface,
    XxeFileDisclosure,
    XxeDos,
}

impl Challenge {
    pub const ALL: [Challenge; 6] = [
        Challenge::UploadSize,
        Challenge::UploadType,
        Challenge::FileWrite,
        Challenge::DeprecatedInterface,
        Challenge::XxeFileDisclosure,
        Challenge::XxeDos,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Challenge::UploadSize => "uploadSizeChallenge",
            Challenge::UploadType => "uploadTypeChallenge",
            Challenge::FileWrite => "fileWriteChallenge",
            Challenge::DeprecatedInterface => "deprecatedInterfaceChallenge",
            Challenge::XxeFileDisclosure => "xxeFileDisclosureChallenge",
            Challenge::XxeDos => "xxeDosChallenge",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Challenge::UploadSize => "Upload Size",
            Challenge::UploadType => "Upload Type",
            Challenge::FileWrite => "Arbitrary File Write",
            Challenge::DeprecatedInterface => "Deprecated Interface",
            Challenge::XxeFileDisclosure => "XXE Data Access",
            Challenge::XxeDos => "XXE DoS",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Challenge::UploadSize => "Upload a file larger than 100 kB.",
            Challenge::UploadType => "Upload a file that has no .pdf, .xml or .zip extension.",
            Challenge::FileWrite => "Overwrite the Legal Information file.",
            Challenge::DeprecatedInterface => "Use a deprecated B2B interface that was not properly shut down.",
            Challenge::XxeFileDisclosure => "Retrieve the content of C:\\Windows\\system.ini or /etc/passwd from the server.",
            Challenge::XxeDos => "Give the server something to chew on for quite a while.",
        }
    }

    pub fn difficulty(&self) -> u8 {
        match self {
            Challenge::UploadSize | Challenge::UploadType | Challenge::DeprecatedInterface => 3,
            Challenge::XxeFileDisclosure => 3,
            Challenge::XxeDos => 5,
            Challenge::FileWrite => 6,
        }
    }

    /// Runtime environments where the challenge is switched off under safety mode.
    /// XXE payloads and arbitrary file writes regularly crash containerised deployments.
    pub fn disabled_env(&self) -> &'static [&'static str] {
        match self {
            Challenge::FileWrite
            | Challenge::DeprecatedInterface
            | Challenge::XxeFileDisclosure
            | Challenge::XxeDos => &["Docker", "Heroku", "Gitpod"],
            Challenge::UploadSize | Challenge::UploadType => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChallengeStatus {
    pub key: String,
    pub name: String,
    pub description: String,
    pub difficulty: u8,
    pub enabled: bool,
    pub solved: bool,
    pub solved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uploaded_file_size_matches_buffer() {
        let file = UploadedFile::new("Complaint.ZIP", Bytes::from_static(b"PK\x03\x04"));
        assert_eq!(file.size, 4);
        assert!(file.has_extension(".zip"));
        assert!(!file.has_extension(".xml"));
    }

    #[test]
    fn test_challenge_keys_are_unique() {
        let mut keys: Vec<_> = Challenge::ALL.iter().map(|c| c.key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), Challenge::ALL.len());
    }
}
