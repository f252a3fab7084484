#![no_main]

use libfuzzer_sys::fuzz_target;
use viewhouse_core::QuerySpec;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes as JSON query records. Tests handling of:
    // - Malformed JSON
    // - Unknown operators, aggregates, and fields
    // - Extremely long strings and deep nesting
    // - Invalid UTF-8 (converted to lossy string)
    let raw = String::from_utf8_lossy(data);

    // Parsing and validation must never panic - only return Ok or Err.
    let _ = QuerySpec::from_json(&raw);
});
