//! TOML layer merging.

/// Recursively deep-merge `overlay` into `base`.
///
/// - Tables merge recursively per-field.
/// - Scalars and arrays from the overlay **replace** the base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_tables_merge_per_field() {
        let mut base = parse("[trust]\nrequired = true\nverify_if_present = true\n");
        deep_merge(&mut base, &parse("[trust]\nrequired = false\n"));

        let trust = base.get("trust").unwrap();
        assert_eq!(trust.get("required").unwrap().as_bool(), Some(false));
        assert_eq!(trust.get("verify_if_present").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_arrays_replace() {
        let mut base = parse("[capabilities]\nallowed_imports = [\"extism\", \"mca\"]\n");
        deep_merge(&mut base, &parse("[capabilities]\nallowed_imports = [\"os\"]\n"));

        let list = base["capabilities"]["allowed_imports"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].as_str(), Some("os"));
    }

    #[test]
    fn test_new_sections_inserted() {
        let mut base = parse("[logging]\nlevel = \"info\"\n");
        deep_merge(&mut base, &parse("[leader]\nenabled = true\n"));
        assert_eq!(base["leader"]["enabled"].as_bool(), Some(true));
        assert_eq!(base["logging"]["level"].as_str(), Some("info"));
    }
}
