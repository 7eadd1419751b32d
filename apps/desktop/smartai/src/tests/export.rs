use crate::commands::export::export_file_name;

use std::time::{Duration, UNIX_EPOCH};

/// **VALUE**: Verifies the export file name embeds the timestamp in millis.
///
/// **WHY THIS MATTERS**: Exports sit side by side in the storage root; the
/// timestamp keeps them unique and sortable.
///
/// **BUG THIS CATCHES**: Would catch switching to seconds, which lets two
/// quick exports overwrite each other.
#[test]
fn given_timestamp_when_naming_export_then_uses_unix_millis() {
    // GIVEN
    let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);

    // WHEN
    let name = export_file_name(at);

    // THEN
    assert_eq!(name, "attack-story-1700000000123.json");
}
