#![no_main]

use libfuzzer_sys::fuzz_target;
use sof_conformance::TestSuite;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(suite) = TestSuite::from_json_str(body) else {
        return;
    };

    // A parsed suite must serialize and parse back to the same model.
    if let Ok(json) = serde_json::to_string(&suite) {
        let reparsed = TestSuite::from_json_str(&json);
        assert_eq!(reparsed.ok().as_ref(), Some(&suite));
    }
});
