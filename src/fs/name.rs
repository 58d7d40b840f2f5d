use super::{FSError, Result};
use crate::container::layout::MAX_FILENAME_LENGTH;
use std::fmt;

/// A name accepted by the directory: 1 to 15 ASCII
/// letters or digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(String);

impl FileName {
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |reason| FSError::InvalidName {
            name: name.to_owned(),
            reason,
        };
        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > MAX_FILENAME_LENGTH {
            return Err(invalid("name is longer than 15 characters"));
        }
        if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(invalid("name can only consist of alphanumeric characters"));
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Zero padded form stored in a file record
    pub fn to_record_bytes(&self) -> [u8; MAX_FILENAME_LENGTH] {
        let mut bytes = [0; MAX_FILENAME_LENGTH];
        bytes[..self.0.len()].copy_from_slice(self.0.as_bytes());
        bytes
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[test]
fn test_valid_names() {
    for name in ["a", "report2024", "ABCdef123456789"] {
        let parsed = FileName::parse(name).unwrap();
        assert_eq!(parsed.as_str(), name);
    }
    assert_eq!(&FileName::parse("ab").unwrap().to_record_bytes()[..3], b"ab\0");
}

#[test]
fn test_invalid_names() {
    for name in ["", "abcdefghijklmnop", "a.txt", "dir/a", "with space", "żółw"] {
        assert!(
            matches!(FileName::parse(name), Err(FSError::InvalidName { .. })),
            "{name:?} should be rejected"
        );
    }
}
