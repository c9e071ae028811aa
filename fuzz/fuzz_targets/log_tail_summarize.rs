#![no_main]

use libfuzzer_sys::fuzz_target;
use testclusters_core::log_tail::{normalize, summarize_lines};

fuzz_target!(|data: (u8, Vec<String>, Vec<String>)| {
    let (tail_size, lines, ignore) = data;
    let tail_size = usize::from(tail_size);
    // A leading continuation line opens a message of its own.
    let messages = lines
        .iter()
        .enumerate()
        .filter(|(i, l)| *i == 0 || l.starts_with('['))
        .count();

    let summary = summarize_lines(lines, tail_size, &ignore);

    assert!(summary.tail.len() <= tail_size.max(1));
    assert!(summary.tail.len() <= messages);
    for (message, count) in &summary.errors_and_warnings {
        assert!(*count >= 1);
        assert_eq!(normalize(message), message.as_str());
        assert!(!ignore.iter().any(|needle| message.contains(needle.as_str())));
    }
    for message in &summary.tail {
        assert!(!ignore.iter().any(|needle| message.contains(needle.as_str())));
    }
    let _ = summary.render("fuzz", "node{:fuzz}");
});
