//! Build script for fibrio-runtime
//!
//! Generates compile-time configuration defaults:
//! 1. Start with library defaults
//! 2. If FIO_CONFIG_RS is set, parse the user's config file
//! 3. Merge user values over defaults (user wins)
//! 4. Write OUT_DIR/fio_merged_config.rs
//!
//! The user file only needs the values it wants to change.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Configuration parameter definition
struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

/// All configuration parameters with their defaults
const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "NUM_WORKERS",
        rust_type: "usize",
        default_value: "1",
    },
    ConfigParam {
        name: "USE_CALLER",
        rust_type: "bool",
        default_value: "true",
    },
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "128 * 1024",
    },
    ConfigParam {
        name: "CALLBACK_FIBER_POOL",
        rust_type: "usize",
        default_value: "1",
    },
    ConfigParam {
        name: "PARK_TIMEOUT_MS",
        rust_type: "u64",
        default_value: "100",
    },
    ConfigParam {
        name: "MAX_WAIT_MS",
        rust_type: "u64",
        default_value: "3000",
    },
    ConfigParam {
        name: "MAX_EVENTS",
        rust_type: "usize",
        default_value: "256",
    },
    ConfigParam {
        name: "INITIAL_FD_CAPACITY",
        rust_type: "usize",
        default_value: "32",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("fio_merged_config.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    if let Ok(user_path) = env::var("FIO_CONFIG_RS") {
        println!("cargo:rerun-if-changed={}", user_path);

        match fs::read_to_string(&user_path) {
            Ok(content) => {
                parse_and_merge(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read FIO_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }

    println!("cargo:rerun-if-env-changed=FIO_CONFIG_RS");
    println!("cargo:rerun-if-changed=build.rs");

    let output = generate_config(&config);
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Parse the user's config file and merge values into the map
fn parse_and_merge(content: &str, config: &mut HashMap<&str, String>) {
    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with("//") || !line.starts_with("pub const ") {
            continue;
        }

        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };

        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

/// Parse `pub const NAME: TYPE = VALUE;` into (name, value)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();

    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();

    Some((name, value))
}

fn generate_config(config: &HashMap<&str, String>) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    output.push_str("// Configuration merged from library defaults");
    if env::var("FIO_CONFIG_RS").is_ok() {
        output.push_str(" and user's fio_config.rs");
    }
    output.push_str("\n\n");

    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        let result = parse_const_line("pub const NUM_WORKERS: usize = 8;");
        assert_eq!(result, Some(("NUM_WORKERS".into(), "8".into())));

        let result = parse_const_line("pub const STACK_SIZE: usize = 256 * 1024;");
        assert_eq!(result, Some(("STACK_SIZE".into(), "256 * 1024".into())));
    }

    #[test]
    fn test_parse_and_merge() {
        let mut config: HashMap<&str, String> = HashMap::new();
        config.insert("NUM_WORKERS", "1".into());
        config.insert("MAX_WAIT_MS", "3000".into());

        let user_config = r#"
            // Custom config
            pub const NUM_WORKERS: usize = 16;
            pub const MAX_WAIT_MS: u64 = 500;
            pub const NOT_A_PARAM: u8 = 1;
        "#;

        parse_and_merge(user_config, &mut config);

        assert_eq!(config.get("NUM_WORKERS"), Some(&"16".to_string()));
        assert_eq!(config.get("MAX_WAIT_MS"), Some(&"500".to_string()));
        assert!(!config.contains_key("NOT_A_PARAM"));
    }
}
