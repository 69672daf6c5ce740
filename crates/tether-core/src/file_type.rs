//! Device-side file types, identified by a `(data_type, sub_type)` pair in
//! the band's file directory.

use serde::{Deserialize, Serialize};

/// Data type shared by every FIT-encoded file.
pub const FIT_DATA_TYPE: u8 = 128;

/// A file type as reported by the device. Lookup is total: pairs this build
/// does not know come back as [`FileType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Activity,
    Monitor,
    Changelog,
    Metrics,
    Sleep,
    Directory,
    Unknown { data_type: u8, sub_type: u8 },
}

impl FileType {
    const KNOWN: [FileType; 6] = [
        FileType::Activity,
        FileType::Monitor,
        FileType::Changelog,
        FileType::Metrics,
        FileType::Sleep,
        FileType::Directory,
    ];

    pub fn from_data_type_sub_type(data_type: u8, sub_type: u8) -> FileType {
        Self::KNOWN
            .into_iter()
            .find(|t| t.data_type() == data_type && t.sub_type() == sub_type)
            .unwrap_or(FileType::Unknown { data_type, sub_type })
    }

    pub fn data_type(&self) -> u8 {
        match self {
            FileType::Directory => 0,
            FileType::Unknown { data_type, .. } => *data_type,
            _ => FIT_DATA_TYPE,
        }
    }

    pub fn sub_type(&self) -> u8 {
        match self {
            FileType::Activity => 4,
            FileType::Monitor => 32,
            FileType::Changelog => 41,
            FileType::Metrics => 44,
            FileType::Sleep => 49,
            FileType::Directory => 0,
            FileType::Unknown { sub_type, .. } => *sub_type,
        }
    }

    /// FIT files share data type 128, known sub-type or not.
    pub fn is_fit_file(&self) -> bool {
        self.data_type() == FIT_DATA_TYPE
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, FileType::Unknown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_pairs() {
        assert_eq!(FileType::from_data_type_sub_type(128, 4), FileType::Activity);
        assert_eq!(FileType::from_data_type_sub_type(128, 49), FileType::Sleep);
        assert_eq!(FileType::from_data_type_sub_type(0, 0), FileType::Directory);
    }

    #[test]
    fn test_lookup_unknown_is_explicit() {
        let t = FileType::from_data_type_sub_type(128, 99);
        assert_eq!(t, FileType::Unknown { data_type: 128, sub_type: 99 });
        assert!(t.is_fit_file());
        assert!(!t.is_known());

        let t = FileType::from_data_type_sub_type(0, 4);
        assert!(!t.is_fit_file());
        assert!(!t.is_known());
    }

    #[test]
    fn test_known_types_roundtrip_their_codes() {
        for t in FileType::KNOWN {
            assert_eq!(FileType::from_data_type_sub_type(t.data_type(), t.sub_type()), t);
        }
        assert!(FileType::Metrics.is_fit_file());
        assert!(!FileType::Directory.is_fit_file());
    }
}
