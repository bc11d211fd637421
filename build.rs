use std::fs;

/// Finds the resolved reqwest version in `Cargo.lock`, so the HTTP client can advertise it.
fn reqwest_version() -> Option<String> {
    let lockfile: toml::Value = toml::from_str(&fs::read_to_string("Cargo.lock").ok()?).ok()?;
    lockfile
        .get("package")?
        .as_array()?
        .iter()
        .find(|package| package.get("name").and_then(toml::Value::as_str) == Some("reqwest"))?
        .get("version")?
        .as_str()
        .map(str::to_owned)
}

fn main() {
    let version = reqwest_version().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=REQWEST_VERSION={version}");
    println!("cargo:rerun-if-changed=Cargo.lock");
}
