#![no_main]

use frankenplyr::{BatchEntry, ColumnIndex, Environment, classify_batch};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let env = Environment::global().bind("k", 2_i64).into_shared();
    let Ok(entries) = BatchEntry::parse_all(input, &env) else {
        return;
    };
    let Ok(columns) = ColumnIndex::new(["a", "b", "c"]) else {
        return;
    };
    let _ = classify_batch(&entries, &columns);
});
