use crate::types::{RetrievalError, RetrievalResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Key-value text file (`key = value` or `key: value` per line)
///
/// Used for LUT headers (`.luthdr`) and forward-model coefficient files.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    source: String,
    entries: BTreeMap<String, String>,
}

impl PropertyMap {
    /// Load and parse a property file
    pub fn load<P: AsRef<Path>>(path: P) -> RetrievalResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading property file: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;

        Self::parse(&content, &path.display().to_string())
    }

    /// Parse property text; `source` is only used in error messages
    pub fn parse(content: &str, source: &str) -> RetrievalResult<Self> {
        let line_pattern = Regex::new(r"^\s*([^=:\s]+)\s*[=:]\s*(.*?)\s*$")
            .map_err(|e| RetrievalError::Processing(format!("Regex error: {}", e)))?;

        let mut entries = BTreeMap::new();

        for (line_no, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }

            match line_pattern.captures(line) {
                Some(cap) => {
                    entries.insert(cap[1].to_string(), cap[2].to_string());
                }
                None => {
                    return Err(RetrievalError::lut_format(
                        source,
                        format!("line {} is not a key-value pair: '{}'", line_no + 1, trimmed),
                    ));
                }
            }
        }

        log::debug!("Parsed {} properties from {}", entries.len(), source);

        Ok(Self {
            source: source.to_string(),
            entries,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Required string value
    pub fn require(&self, key: &str) -> RetrievalResult<&str> {
        self.get(key).ok_or_else(|| self.missing(key))
    }

    pub fn get_i32(&self, key: &str) -> RetrievalResult<i32> {
        let raw = self.require(key)?;
        raw.parse::<i32>()
            .map_err(|e| self.invalid(key, raw, &e.to_string()))
    }

    pub fn get_usize(&self, key: &str) -> RetrievalResult<usize> {
        let raw = self.require(key)?;
        raw.parse::<usize>()
            .map_err(|e| self.invalid(key, raw, &e.to_string()))
    }

    pub fn get_f64(&self, key: &str) -> RetrievalResult<f64> {
        let raw = self.require(key)?;
        let value = raw
            .parse::<f64>()
            .map_err(|e| self.invalid(key, raw, &e.to_string()))?;
        if !value.is_finite() {
            return Err(self.invalid(key, raw, "value is not finite"));
        }
        Ok(value)
    }

    /// Optional boolean; accepts true/false/yes/no/1/0
    pub fn get_bool_or(&self, key: &str, default: bool) -> RetrievalResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(self.invalid(key, raw, "expected a boolean")),
            },
        }
    }

    fn missing(&self, key: &str) -> RetrievalError {
        RetrievalError::Coefficient {
            file: self.source.clone(),
            key: key.to_string(),
            message: "missing key".to_string(),
        }
    }

    fn invalid(&self, key: &str, raw: &str, reason: &str) -> RetrievalError {
        RetrievalError::Coefficient {
            file: self.source.clone(),
            key: key.to_string(),
            message: format!("cannot parse '{}': {}", raw, reason),
        }
    }
}

/// Default folder holding soil-moisture LUTs
pub fn default_lut_folder() -> std::path::PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join("loam").join("sm_luts"),
        None => std::path::PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_separators_and_comments() {
        let text = "# LUT header\n\
                    Number_of_rows_per_angle = 13252\n\
                    Start_angle: 18\n\
                    ! legacy comment\n\
                    \n\
                    Stop_angle=45\n\
                    Description = IEM forward model, C-band\n";
        let props = PropertyMap::parse(text, "test.luthdr").unwrap();
        assert_eq!(props.len(), 4);
        assert_eq!(props.get_usize("Number_of_rows_per_angle").unwrap(), 13252);
        assert_eq!(props.get_i32("Start_angle").unwrap(), 18);
        assert_eq!(props.get_i32("Stop_angle").unwrap(), 45);
        assert_eq!(props.get("Description"), Some("IEM forward model, C-band"));
    }

    #[test]
    fn test_missing_and_invalid_keys_name_the_key() {
        let props = PropertyMap::parse("a = x\n", "coeffs.txt").unwrap();
        match props.get_f64("a") {
            Err(RetrievalError::Coefficient { key, file, .. }) => {
                assert_eq!(key, "a");
                assert_eq!(file, "coeffs.txt");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            props.get_i32("b"),
            Err(RetrievalError::Coefficient { .. })
        ));
    }

    #[test]
    fn test_bool_defaults() {
        let props = PropertyMap::parse("flag = yes\n", "p").unwrap();
        assert!(props.get_bool_or("flag", false).unwrap());
        assert!(!props.get_bool_or("other", false).unwrap());
    }
}
