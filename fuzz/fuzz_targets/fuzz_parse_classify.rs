#![no_main]

use frankenplyr::{ColumnIndex, Environment, classify, parse_expr};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(expr) = parse_expr(input) else {
        return;
    };
    // round-trip through the deparser
    let _ = parse_expr(&expr.to_string());

    let Ok(columns) = ColumnIndex::new(["year", "id", "c1", "c2"]) else {
        return;
    };
    let env = Environment::global()
        .bind("year", 1980_i64)
        .bind("cols", "c1")
        .into_shared();
    let _ = classify(&expr, &columns, &env);
});
