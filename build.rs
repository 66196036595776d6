use std::env;
use std::fs;
use std::path::PathBuf;

const DEFAULT_COLLECT_INTERVAL: usize = 128;

fn main() {
    println!("cargo:rerun-if-env-changed=QUIESCE_COLLECT_INTERVAL");

    // Read the variable when the build script runs, so changing it alone,
    // without touching any source file, takes effect on the next build.
    let interval = match env::var("QUIESCE_COLLECT_INTERVAL") {
        Ok(value) => match value.parse::<usize>() {
            Ok(0) => panic!("QUIESCE_COLLECT_INTERVAL must be at least 1"),
            Ok(interval) => interval,
            Err(err) => panic!("QUIESCE_COLLECT_INTERVAL is not a valid count: {}", err),
        },
        Err(env::VarError::NotPresent) => DEFAULT_COLLECT_INTERVAL,
        Err(err) => panic!("QUIESCE_COLLECT_INTERVAL could not be read: {}", err),
    };

    let constants = format!("const PINNINGS_BETWEEN_COLLECT: usize = {};\n", interval);

    let path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"))
        .join("collect_interval.rs");
    fs::write(&path, constants).expect("failed to write the collect interval constant");
}
