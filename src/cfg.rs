use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::persist;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_TEMPLATE_PATH: &str = "config.json.template";
const DEFAULT_DATE_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Typed view over the recognized configuration keys.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub output_directory: PathBuf,
    pub file_naming: FileNaming,
    pub export_options: ExportOptions,
    pub display_options: DisplayOptions,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FileNaming {
    pub include_sheet_name: bool,
    pub include_timestamp: bool,
    pub custom_prefix: String,
    pub custom_suffix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExportOptions {
    pub include_headers: bool,
    pub export_all_worksheets: bool,
    pub worksheet_separator: String,
    pub date_format: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DisplayOptions {
    pub show_progress: bool,
    pub list_limit: usize,
    pub confirm_before_export: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("./exports"),
            file_naming: FileNaming {
                include_sheet_name: true,
                include_timestamp: false,
                custom_prefix: String::new(),
                custom_suffix: String::new(),
            },
            export_options: ExportOptions {
                include_headers: true,
                export_all_worksheets: true,
                worksheet_separator: "_".to_string(),
                date_format: DEFAULT_DATE_FORMAT.to_string(),
            },
            display_options: DisplayOptions {
                show_progress: true,
                list_limit: 50,
                confirm_before_export: true,
            },
        }
    }
}

/// The built-in default tree every loaded configuration is merged over.
pub fn default_tree() -> Value {
    serde_json::to_value(Settings::default()).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Recursively merge `overrides` into `base`.
///
/// Mappings present on both sides are merged key by key; any other value in
/// `overrides` replaces the one in `base` wholesale.
pub fn deep_merge(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            for (key, value) in override_map {
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

/// Replace characters that are invalid in file names with `_`.
pub fn sanitize_filename(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let re = INVALID.get_or_init(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("static pattern is valid"));
    re.replace_all(name, "_").trim().to_string()
}

/// Layered settings: built-in defaults with the user's JSON file merged on top.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    tree: Value,
}

impl ConfigStore {
    /// Load the configuration at `path`. A missing or unparsable file yields
    /// the defaults; this never fails.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Loading configuration from: {}", path.display());

        let mut tree = default_tree();
        if path.exists() {
            match read_user_tree(&path) {
                Ok(user_tree) => {
                    deep_merge(&mut tree, &user_tree);
                    debug!("Merged user configuration over defaults");
                }
                Err(e) => {
                    warn!("Error loading config file {}: {}", path.display(), e);
                    warn!("Using default configuration");
                }
            }
        } else {
            debug!("Config file not found, using defaults");
        }

        Self { path, tree }
    }

    /// A store holding only the defaults, bound to `path` for [`save`](Self::save).
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tree: default_tree(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Look up a `.`-separated key. `None` if any segment is absent or a
    /// non-mapping is reached before the last segment.
    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.tree, |node, segment| node.as_object()?.get(segment))
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    /// Set a `.`-separated key, creating intermediate mappings as needed.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = key.split('.').collect();
        let leaf = segments.pop().unwrap_or(key);

        let mut target = &mut self.tree;
        for segment in segments {
            target = as_object_mut(target)
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        as_object_mut(target).insert(leaf.to_string(), value.into());
    }

    /// The merged tree as typed settings. A value of the wrong type is
    /// reported and replaced by its own default; other keys are unaffected.
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        let naming = defaults.file_naming;
        let export = defaults.export_options;
        let display = defaults.display_options;

        Settings {
            output_directory: self.field("output_directory", defaults.output_directory),
            file_naming: FileNaming {
                include_sheet_name: self.field("file_naming.include_sheet_name", naming.include_sheet_name),
                include_timestamp: self.field("file_naming.include_timestamp", naming.include_timestamp),
                custom_prefix: self.field("file_naming.custom_prefix", naming.custom_prefix),
                custom_suffix: self.field("file_naming.custom_suffix", naming.custom_suffix),
            },
            export_options: ExportOptions {
                include_headers: self.field("export_options.include_headers", export.include_headers),
                export_all_worksheets: self.field(
                    "export_options.export_all_worksheets",
                    export.export_all_worksheets,
                ),
                worksheet_separator: self.field("export_options.worksheet_separator", export.worksheet_separator),
                date_format: self.field("export_options.date_format", export.date_format),
            },
            display_options: DisplayOptions {
                show_progress: self.field("display_options.show_progress", display.show_progress),
                list_limit: self.field("display_options.list_limit", display.list_limit),
                confirm_before_export: self.field(
                    "display_options.confirm_before_export",
                    display.confirm_before_export,
                ),
            },
        }
    }

    fn field<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(value) = self.get(key) else {
            return default;
        };
        T::deserialize(value).unwrap_or_else(|e| {
            warn!("{}", Error::ConfigParse(format!("'{}': {}", key, e)));
            default
        })
    }

    pub fn compute_filename(&self, sheet_name: &str, worksheet_name: Option<&str>) -> String {
        self.compute_filename_at(sheet_name, worksheet_name, Local::now())
    }

    /// Assemble `[prefix]_[sheet][sep worksheet]_[timestamp]_[suffix].csv`,
    /// dropping disabled or empty segments.
    pub fn compute_filename_at(
        &self,
        sheet_name: &str,
        worksheet_name: Option<&str>,
        now: DateTime<Local>,
    ) -> String {
        let settings = self.settings();
        let naming = &settings.file_naming;
        let worksheet_separator = sanitize_filename(&settings.export_options.worksheet_separator);

        let mut segments: Vec<(&str, String)> = Vec::new();
        segments.push(("_", sanitize_filename(&naming.custom_prefix)));
        if naming.include_sheet_name {
            segments.push(("_", sanitize_filename(sheet_name)));
        }
        if let Some(worksheet) = worksheet_name {
            segments.push((worksheet_separator.as_str(), sanitize_filename(worksheet)));
        }
        if naming.include_timestamp {
            let stamp = format_timestamp(now, &settings.export_options.date_format);
            segments.push(("_", sanitize_filename(&stamp)));
        }
        segments.push(("_", sanitize_filename(&naming.custom_suffix)));
        segments.retain(|(_, segment)| !segment.is_empty());

        let mut filename = String::new();
        for (i, (separator, segment)) in segments.iter().enumerate() {
            if i > 0 {
                filename.push_str(separator);
            }
            filename.push_str(segment);
        }
        if filename.is_empty() {
            filename = sanitize_filename(sheet_name);
        }

        format!("{}.csv", filename)
    }

    /// The configured output directory, created (with parents) if absent.
    pub fn resolve_output_directory(&self) -> Result<PathBuf> {
        let dir = self.settings().output_directory;
        fs::create_dir_all(&dir).map_err(|e| Error::filesystem(&dir, e))?;
        debug!("Output directory ready: {}", dir.display());
        Ok(dir)
    }

    /// Write the current tree back to the config file.
    pub fn save(&self) -> Result<()> {
        persist::save_json(&self.path, &self.tree, false)?;
        info!("Saved configuration to {}", self.path.display());
        Ok(())
    }

    /// Write the default tree to `path` as a starting point for users.
    pub fn write_template(path: &Path) -> Result<()> {
        persist::save_json(path, &default_tree(), false)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.tree).unwrap_or_default()
    }
}

/// Keys keep their case, so custom entries survive a save and reload.
fn read_user_tree(path: &Path) -> Result<Value> {
    match persist::load_json::<Value>(path) {
        Ok(Some(tree @ Value::Object(_))) => Ok(tree),
        Ok(Some(_)) => Err(Error::ConfigParse("top level must be a JSON object".to_string())),
        Ok(None) => Ok(Value::Object(Map::new())),
        Err(e) => Err(Error::ConfigParse(e.to_string())),
    }
}

fn as_object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

fn format_timestamp(now: DateTime<Local>, pattern: &str) -> String {
    let items: Vec<Item> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        warn!(
            "Invalid date_format '{}', falling back to '{}'",
            pattern, DEFAULT_DATE_FORMAT
        );
        return now.format(DEFAULT_DATE_FORMAT).to_string();
    }
    now.format_with_items(items.into_iter()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn store_with(overrides: Value) -> ConfigStore {
        let mut store = ConfigStore::with_defaults("unused.json");
        deep_merge(&mut store.tree, &overrides);
        store
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_deep_merge_keeps_sibling_keys() {
        let mut base = json!({"a": {"x": 1, "y": 2}});
        deep_merge(&mut base, &json!({"a": {"y": 3, "z": 4}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn test_deep_merge_scalar_replaces_mapping() {
        let mut base = json!({"a": {"x": 1}, "b": 2});
        deep_merge(&mut base, &json!({"a": "flat", "c": {"d": true}}));
        assert_eq!(base, json!({"a": "flat", "b": 2, "c": {"d": true}}));
    }

    #[test]
    fn test_get_returns_default_for_missing_paths() {
        let store = ConfigStore::with_defaults("unused.json");
        assert_eq!(store.get_str("output_directory", "x"), "./exports");
        assert!(store.get("file_naming.nope").is_none());
        assert!(store.get("output_directory.deeper").is_none());
        assert_eq!(store.get_u64("display_options.list_limit", 0), 50);
        assert!(!store.get_bool("no.such.key", false));
    }

    #[test]
    fn test_set_creates_intermediate_mappings() {
        let mut store = ConfigStore::with_defaults("unused.json");
        store.set("custom.nested.key", "value");
        store.set("output_directory.sub", 1);
        assert_eq!(store.get_str("custom.nested.key", ""), "value");
        assert_eq!(store.get("output_directory.sub"), Some(&json!(1)));

        store.set("file_naming.include_timestamp", true);
        assert!(store.get_bool("file_naming.include_timestamp", false));
        assert!(store.get_bool("file_naming.include_sheet_name", false));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Q1/Sales"), "Q1_Sales");
        assert_eq!(sanitize_filename(r#"a<b>c:d"e/f\g|h?i*j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("  padded  "), "padded");
    }

    #[test]
    fn test_filename_defaults() {
        let store = ConfigStore::with_defaults("unused.json");
        assert_eq!(store.compute_filename("Budget", None), "Budget.csv");
        assert_eq!(store.compute_filename("Budget", Some("Jan")), "Budget_Jan.csv");
        assert_eq!(store.compute_filename("Q1/Sales", Some("a:b")), "Q1_Sales_a_b.csv");
    }

    #[test]
    fn test_filename_with_all_segments() {
        let store = store_with(json!({
            "file_naming": {
                "include_timestamp": true,
                "custom_prefix": "pre",
                "custom_suffix": "post"
            }
        }));
        let name = store.compute_filename_at("Budget", Some("Jan"), fixed_now());
        assert_eq!(name, "pre_Budget_Jan_20240305_140709_post.csv");
    }

    #[test]
    fn test_filename_without_sheet_name() {
        let store = store_with(json!({"file_naming": {"include_sheet_name": false}}));
        assert_eq!(store.compute_filename("Budget", Some("Jan")), "Jan.csv");
        assert_eq!(store.compute_filename("Budget", None), "Budget.csv");
    }

    #[test]
    fn test_filename_custom_separator() {
        let store = store_with(json!({"export_options": {"worksheet_separator": "-"}}));
        assert_eq!(store.compute_filename("Budget", Some("Jan")), "Budget-Jan.csv");
    }

    #[test]
    fn test_invalid_date_format_falls_back() {
        let store = store_with(json!({
            "file_naming": {"include_timestamp": true},
            "export_options": {"date_format": "%Q"}
        }));
        let name = store.compute_filename_at("Budget", None, fixed_now());
        assert_eq!(name, "Budget_20240305_140709.csv");
    }

    #[test]
    fn test_timestamp_is_sanitized() {
        let store = store_with(json!({
            "file_naming": {"include_timestamp": true},
            "export_options": {"date_format": "%Y/%m/%d"}
        }));
        let name = store.compute_filename_at("Budget", None, fixed_now());
        assert_eq!(name, "Budget_2024_03_05.csv");
    }

    #[test]
    fn test_wrong_type_falls_back_for_that_key_only() {
        let store = store_with(json!({
            "file_naming": {"include_timestamp": "yes", "custom_prefix": "acme"}
        }));
        let settings = store.settings();
        assert!(!settings.file_naming.include_timestamp);
        assert_eq!(settings.file_naming.custom_prefix, "acme");
    }

    #[test]
    fn test_bad_list_limit_keeps_output_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"output_directory": "/data/out", "display_options": {"list_limit": "100"}}"#,
        )
        .unwrap();

        let settings = ConfigStore::load(&path).settings();
        assert_eq!(settings.output_directory, PathBuf::from("/data/out"));
        assert_eq!(settings.display_options.list_limit, 50);
        assert!(settings.display_options.confirm_before_export);
    }

    #[test]
    fn test_mistyped_section_uses_section_defaults() {
        let store = store_with(json!({"export_options": "none", "output_directory": "csv"}));
        let settings = store.settings();
        assert_eq!(settings.export_options, Settings::default().export_options);
        assert_eq!(settings.output_directory, PathBuf::from("csv"));
    }

    #[test]
    fn test_custom_keys_keep_case_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::with_defaults(&path);
        store.set("file_naming.myKey", "kept");
        store.save().unwrap();

        let reloaded = ConfigStore::load(&path);
        assert_eq!(reloaded.get_str("file_naming.myKey", ""), "kept");
        assert!(reloaded.get("file_naming.mykey").is_none());
    }

    #[test]
    fn test_non_object_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();

        assert_eq!(ConfigStore::load(&path).tree(), &default_tree());
    }

    #[test]
    fn test_load_merges_user_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"output_directory": "/tmp/out", "file_naming": {"custom_prefix": "x"}}"#,
        )
        .unwrap();

        let store = ConfigStore::load(&path);
        let settings = store.settings();
        assert_eq!(settings.output_directory, PathBuf::from("/tmp/out"));
        assert_eq!(settings.file_naming.custom_prefix, "x");
        assert!(settings.file_naming.include_sheet_name);
        assert!(settings.export_options.export_all_worksheets);
    }

    #[test]
    fn test_load_parse_failure_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ this is not json").unwrap();

        let store = ConfigStore::load(&path);
        assert_eq!(store.tree(), &default_tree());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("absent.json"));
        assert_eq!(store.settings(), Settings::default());
    }

    #[test]
    fn test_resolve_output_directory_is_idempotent() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("a").join("b");
        let mut store = ConfigStore::with_defaults("unused.json");
        store.set("output_directory", out.to_string_lossy().to_string());

        assert_eq!(store.resolve_output_directory().unwrap(), out);
        assert_eq!(store.resolve_output_directory().unwrap(), out);
        assert!(out.is_dir());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::with_defaults(&path);
        store.set("export_options.export_all_worksheets", false);
        store.save().unwrap();

        let reloaded = ConfigStore::load(&path);
        assert!(!reloaded.settings().export_options.export_all_worksheets);
    }

    #[test]
    fn test_write_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_TEMPLATE_PATH);
        ConfigStore::write_template(&path).unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, default_tree());
    }
}
