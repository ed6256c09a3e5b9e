//! Persistent key/value settings store.
//!
//! One `"key" "value"` pair per line; keys and string values are
//! double-quoted with `\"` and `\\` escapes. The file is rewritten on drop.

use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct Settings {
    file_name: PathBuf,
    map: BTreeMap<String, String>,
}

fn make_quoted_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 3);
    result.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            result.push('\\');
        }
        result.push(c);
    }
    result.push('"');
    result
}

/// Consume one token: either a quoted string with escapes or a bare word.
fn parse_token(s: &mut std::iter::Peekable<std::str::Chars>) -> Option<String> {
    while matches!(s.peek(), Some(c) if c.is_whitespace()) {
        s.next();
    }
    s.peek()?;

    let mut token = String::new();
    if s.peek() == Some(&'"') {
        s.next();
        while let Some(c) = s.next() {
            match c {
                '"' => break,
                '\\' => {
                    if let Some(&next) = s.peek() {
                        if next == '"' || next == '\\' {
                            token.push(next);
                            s.next();
                            continue;
                        }
                    }
                    token.push('\\');
                }
                _ => token.push(c),
            }
        }
    } else {
        while let Some(&c) = s.peek() {
            if c.is_whitespace() {
                break;
            }
            token.push(c);
            s.next();
        }
    }
    Some(token)
}

impl Settings {
    pub fn load(file_name: PathBuf) -> Settings {
        let mut map = BTreeMap::new();

        match std::fs::read_to_string(&file_name) {
            Ok(content) => {
                let mut chars = content.chars().peekable();
                while let Some(key) = parse_token(&mut chars) {
                    if key.is_empty() {
                        continue;
                    }
                    let value = parse_token(&mut chars).unwrap_or_default();
                    map.insert(key, value);
                }
            }
            Err(e) => log::warn!("can not open settings file \"{}\": {}", file_name.display(), e),
        }

        Settings { file_name, map }
    }

    pub fn store(&self) {
        let mut out = String::new();
        for (key, value) in &self.map {
            out.push_str(&make_quoted_string(key));
            out.push(' ');
            out.push_str(&make_quoted_string(value));
            out.push_str("\r\n");
        }

        if let Err(e) = std::fs::write(&self.file_name, out) {
            log::warn!(
                "can not write settings file \"{}\": {}",
                self.file_name.display(),
                e
            );
        }
    }

    pub fn is_value(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn set_string(&mut self, name: &str, value: &str) {
        self.map.insert(name.to_string(), value.to_string());
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.map.insert(name.to_string(), value.to_string());
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.set_int(name, value as i32);
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.map.insert(name.to_string(), format!("{}", value));
    }

    pub fn get_string<'a>(&'a self, name: &str, default_value: &'a str) -> &'a str {
        self.map.get(name).map(String::as_str).unwrap_or(default_value)
    }

    pub fn get_int(&self, name: &str, default_value: i32) -> i32 {
        self.map
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_value)
    }

    pub fn get_float(&self, name: &str, default_value: f32) -> f32 {
        self.map
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_value)
    }

    pub fn get_bool(&self, name: &str, default_value: bool) -> bool {
        self.get_int(name, default_value as i32) != 0
    }
}

impl Drop for Settings {
    fn drop(&mut self) {
        self.store();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.cfg");

        {
            let mut settings = Settings::load(path.clone());
            settings.set_string("r_renderer", "software");
            settings.set_int("cl_fov", 90);
            settings.set_float("snd_volume", 0.5);
            settings.set_string("player name", "quoted \"guy\" \\ here");
        }

        let settings = Settings::load(path);
        assert_eq!(settings.get_string("r_renderer", ""), "software");
        assert_eq!(settings.get_int("cl_fov", 0), 90);
        assert!((settings.get_float("snd_volume", 0.0) - 0.5).abs() < 1e-6);
        assert_eq!(
            settings.get_string("player name", ""),
            "quoted \"guy\" \\ here"
        );
    }

    #[test]
    fn defaults_on_missing_or_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::load(dir.path().join("none.cfg"));
        assert_eq!(settings.get_int("missing", 7), 7);
        settings.set_string("word", "abc");
        assert_eq!(settings.get_int("word", 7), 7);
        assert!(!settings.get_bool("missing", false));
        settings.set_bool("on", true);
        assert!(settings.get_bool("on", false));
    }
}
