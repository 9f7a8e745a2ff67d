pub fn print(verbose: bool) {
    println!("bridge [version {}]", env!("CARGO_PKG_VERSION"));
    println!("import module: {}", runtime::imports::MODULE);
    if verbose {
        for (label, value) in details() {
            println!("{label}: {value}");
        }
    }
}

/// Build stamps from `build.rs` plus the size of the import table.
fn details() -> Vec<(&'static str, String)> {
    let stamp = |value: Option<&'static str>| value.unwrap_or("unknown").to_string();
    vec![
        ("revision", stamp(option_env!("BRIDGE_REVISION"))),
        ("wasmtime", stamp(option_env!("BRIDGE_WASMTIME"))),
        ("profile", stamp(option_env!("BRIDGE_PROFILE"))),
        ("target", stamp(option_env!("BRIDGE_TARGET"))),
        ("imports", runtime::imports::IMPORTS.len().to_string()),
    ]
}
