#![no_main]

use libfuzzer_sys::fuzz_target;
use testclusters_core::config::{FixtureConfig, NodeManifest};
use testclusters_core::version::Version;

fuzz_target!(|data: &str| {
    if let Ok(version) = data.parse::<Version>() {
        let reparsed: Version = version.to_string().parse().expect("display output parses");
        assert_eq!(reparsed, version);
        assert_eq!(reparsed.qualifier, version.qualifier);
    }

    let _ = toml::from_str::<FixtureConfig>(data);
    if let Ok(manifest) = toml::from_str::<NodeManifest>(data) {
        if let Ok(spec) = manifest.to_spec() {
            let _ = spec.freeze();
        }
    }
});
