use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, line_ending, space0},
    combinator::opt,
    multi::many0,
    IResult,
};

/// Section name used for keys that appear before any `[section]` header.
pub const GLOBAL_SECTION: &str = "";

/// A parsed settings file preserving comments, sections and ordering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsFile {
    pub entries: Vec<SettingsLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsLine {
    /// A `[section]` header; every following key belongs to it
    Section(String),
    /// A key = value pair
    KeyValue { key: String, value: String },
    /// A comment line (including the # prefix)
    Comment(String),
    /// An empty/blank line
    Blank,
}

impl SettingsFile {
    /// Iterate `(section, key, value)` triples in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        let mut current = GLOBAL_SECTION;
        self.entries.iter().filter_map(move |line| match line {
            SettingsLine::Section(name) => {
                current = name.as_str();
                None
            }
            SettingsLine::KeyValue { key, value } => Some((current, key.as_str(), value.as_str())),
            _ => None,
        })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.iter()
            .find(|(s, k, _)| *s == section && *k == key)
            .map(|(_, _, v)| v)
    }

    pub fn set(&mut self, section: &str, key: &str, new_value: &str) {
        let mut current = GLOBAL_SECTION.to_string();
        // Index after which a new key for `section` should be inserted.
        let mut insert_at = None;

        for (idx, line) in self.entries.iter_mut().enumerate() {
            match line {
                SettingsLine::Section(name) => {
                    current = name.clone();
                    if current == section {
                        insert_at = Some(idx + 1);
                    }
                }
                SettingsLine::KeyValue { key: k, value: v } if current == section => {
                    if k == key {
                        *v = new_value.to_string();
                        return;
                    }
                    insert_at = Some(idx + 1);
                }
                _ => {}
            }
        }

        let line = SettingsLine::KeyValue {
            key: key.to_string(),
            value: new_value.to_string(),
        };

        match insert_at {
            Some(idx) => self.entries.insert(idx, line),
            None if section == GLOBAL_SECTION => self.entries.insert(0, line),
            None => {
                if !matches!(self.entries.last(), None | Some(SettingsLine::Blank)) {
                    self.entries.push(SettingsLine::Blank);
                }
                self.entries.push(SettingsLine::Section(section.to_string()));
                self.entries.push(line);
            }
        }
    }

    pub fn remove(&mut self, section: &str, key: &str) {
        let mut current = GLOBAL_SECTION.to_string();
        self.entries.retain(|line| match line {
            SettingsLine::Section(name) => {
                current = name.clone();
                true
            }
            SettingsLine::KeyValue { key: k, .. } => !(current == section && k == key),
            _ => true,
        });
    }

    pub fn serialize(&self) -> String {
        let mut output = String::new();
        for line in &self.entries {
            match line {
                SettingsLine::Section(name) => {
                    output.push_str(&format!("[{}]\n", name));
                }
                SettingsLine::KeyValue { key, value } => {
                    output.push_str(&format!("{} = {}\n", key, value));
                }
                SettingsLine::Comment(c) => {
                    output.push_str(c);
                    output.push('\n');
                }
                SettingsLine::Blank => {
                    output.push('\n');
                }
            }
        }
        output
    }
}

// nom parsers

fn is_not_newline(c: char) -> bool {
    c != '\n' && c != '\r'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn comment_line(input: &str) -> IResult<&str, SettingsLine> {
    let (input, _) = space0(input)?;
    let (input, _) = char('#')(input)?;
    let (input, rest) = take_while(is_not_newline)(input)?;
    let (input, _) = opt(line_ending)(input)?;
    Ok((input, SettingsLine::Comment(format!("#{}", rest))))
}

fn blank_line(input: &str) -> IResult<&str, SettingsLine> {
    let (input, _) = space0(input)?;
    let (input, _) = line_ending(input)?;
    Ok((input, SettingsLine::Blank))
}

fn section_line(input: &str) -> IResult<&str, SettingsLine> {
    let (input, _) = space0(input)?;
    let (input, _) = char('[')(input)?;
    let (input, _) = space0(input)?;
    let (input, name) = take_while1(is_name_char)(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char(']')(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = opt(line_ending)(input)?;
    Ok((input, SettingsLine::Section(name.to_string())))
}

fn key_value_line(input: &str) -> IResult<&str, SettingsLine> {
    let (input, _) = space0(input)?;
    let (input, key) = take_while1(is_name_char)(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = space0(input)?;
    let (input, val) = take_while(is_not_newline)(input)?;
    let (input, _) = opt(line_ending)(input)?;
    Ok((
        input,
        SettingsLine::KeyValue {
            key: key.to_string(),
            value: val.trim_end().to_string(),
        },
    ))
}

fn settings_line(input: &str) -> IResult<&str, SettingsLine> {
    alt((comment_line, blank_line, section_line, key_value_line))(input)
}

pub fn parse_settings(input: &str) -> Result<SettingsFile, String> {
    let (remaining, entries) =
        many0(settings_line)(input).map_err(|e| format!("Parse error: {}", e))?;

    if !remaining.trim().is_empty() {
        let line = input[..input.len() - remaining.len()].lines().count() + 1;
        return Err(format!(
            "Unparsed content at line {}: {:?}",
            line,
            &remaining[..remaining.len().min(100)]
        ));
    }

    Ok(SettingsFile { entries })
}
