use std::collections::HashMap;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=migrations");

    // Duplicate migration versions make sqlx fail at runtime with an opaque
    // checksum error; catch them at build time instead.
    let dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap()).join("migrations");
    let mut seen: HashMap<String, String> = HashMap::new();

    for entry in std::fs::read_dir(&dir).expect("migrations directory is missing") {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        if !name.ends_with(".sql") {
            continue;
        }
        let version = name
            .split('_')
            .next()
            .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or_else(|| panic!("migration '{name}' needs a '<version>_<name>.sql' name"))
            .to_string();
        if let Some(previous) = seen.insert(version.clone(), name.clone()) {
            panic!("duplicate migration version {version}: {previous} and {name}");
        }
    }
}
