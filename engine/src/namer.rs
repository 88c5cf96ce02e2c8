//! Canonical archive naming.
//!
//! The archive name is `prefix + DD.MM.YYYY + extension`. It is a pure
//! function of its inputs: the same prefix on the same calendar day always
//! gives the same name, which is what makes daily deduplication work.

use std::path::Path;
use chrono::{Datelike, NaiveDate};
use crate::model::ArchiveTarget;

/// Prefix used when none (or only whitespace) is configured.
pub const DEFAULT_PREFIX: &str = "spfSense";

/// Build the archive file name.
///
/// `extension` is the source file's extension without the leading dot; pass
/// `None` when the download had none.
pub fn archive_name(prefix: Option<&str>, date: NaiveDate, extension: Option<&str>) -> String {
    let prefix = sanitize_prefix(prefix);
    let suffix = match extension {
        Some(ext) if !ext.is_empty() => format!(".{}", ext),
        _ => String::new(),
    };
    format!(
        "{}{:02}.{:02}.{}{}",
        prefix,
        date.day(),
        date.month(),
        date.year(),
        suffix
    )
}

/// Resolve the archive target for a downloaded file placed in `directory`.
pub fn archive_target(
    directory: &Path,
    prefix: Option<&str>,
    date: NaiveDate,
    downloaded: &Path,
) -> ArchiveTarget {
    let extension = downloaded.extension().and_then(|e| e.to_str());
    ArchiveTarget {
        directory: directory.to_path_buf(),
        file_name: archive_name(prefix, date, extension),
    }
}

// Path separators would move the archive out of its directory.
fn sanitize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(str::trim) {
        Some(p) if !p.is_empty() => p.replace(['/', '\\'], "_"),
        _ => DEFAULT_PREFIX.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn test_zero_padded_day_and_month() {
        assert_eq!(
            archive_name(Some("fw-"), date(2024, 3, 5), Some("xml")),
            "fw-05.03.2024.xml"
        );
        assert_eq!(
            archive_name(Some("fw-"), date(2024, 12, 25), Some("xml")),
            "fw-25.12.2024.xml"
        );
    }

    #[test]
    fn test_name_is_pure() {
        let a = archive_name(Some("fw-"), date(2024, 3, 5), Some("xml"));
        let b = archive_name(Some("fw-"), date(2024, 3, 5), Some("xml"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_day_and_prefix_change_the_name() {
        let base = archive_name(Some("fw-"), date(2024, 3, 5), Some("xml"));
        assert_ne!(base, archive_name(Some("fw-"), date(2024, 3, 6), Some("xml")));
        assert_ne!(base, archive_name(Some("edge-"), date(2024, 3, 5), Some("xml")));
    }

    #[test]
    fn test_missing_prefix_uses_default() {
        let expected = format!("{}05.03.2024.xml", DEFAULT_PREFIX);
        assert_eq!(archive_name(None, date(2024, 3, 5), Some("xml")), expected);
        assert_eq!(archive_name(Some(""), date(2024, 3, 5), Some("xml")), expected);
        assert_eq!(archive_name(Some("   "), date(2024, 3, 5), Some("xml")), expected);
    }

    #[test]
    fn test_separators_in_prefix_are_replaced() {
        assert_eq!(
            archive_name(Some("../site/fw"), date(2024, 3, 5), Some("xml")),
            ".._site_fw05.03.2024.xml"
        );
    }

    #[test]
    fn test_extensionless_download() {
        assert_eq!(archive_name(Some("fw-"), date(2024, 3, 5), None), "fw-05.03.2024");
    }

    #[test]
    fn test_archive_target_keeps_source_extension() {
        let target = archive_target(
            Path::new("files"),
            Some("fw-"),
            date(2024, 3, 5),
            Path::new("files/config-pfsense.home-20240305.xml"),
        );
        assert_eq!(target.file_name, "fw-05.03.2024.xml");
        assert_eq!(target.path(), PathBuf::from("files").join("fw-05.03.2024.xml"));
    }
}
