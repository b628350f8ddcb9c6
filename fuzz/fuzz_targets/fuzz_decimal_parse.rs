#![no_main]

use libfuzzer_sys::fuzz_target;
use sof_types::Decimal;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(value) = Decimal::parse(text) else {
        return;
    };

    let rendered = value.to_string();
    let reparsed = Decimal::parse(&rendered).expect("rendered decimal should parse");
    assert_eq!(reparsed, value, "{text} -> {rendered}");
});
