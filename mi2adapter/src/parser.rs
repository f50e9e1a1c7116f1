/// GDB/MI output parser
///
/// A small recursive-descent parser over the MI2 output grammar:
///
/// ```text
/// record  := [token] ( '^' class | '*' class | '=' class | '+' class ) ( ',' result )*
///          | ( '~' | '@' | '&' ) c-string
///          | '(gdb)'
/// result  := variable '=' value
/// value   := c-string | '{' [ result ( ',' result )* ] '}' | '[' [ (value | result) ( ',' ... )* ] ']'
/// ```
///
/// Commas, braces and brackets inside quoted strings are never structural.

use crate::types::*;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Empty line")]
    Empty,
    #[error("Unknown result class: {0}")]
    UnknownResultClass(String),
    #[error("Unterminated string starting at offset {0}")]
    UnterminatedString(usize),
    #[error("Expected '{expected}' at offset {offset}")]
    Expected { expected: char, offset: usize },
    #[error("Empty identifier at offset {0}")]
    EmptyIdentifier(usize),
    #[error("Unexpected end of input")]
    UnexpectedEnd,
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// Parse one complete line of GDB/MI output
pub fn parse_line(line: &str) -> Result<Record> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    if line.trim() == "(gdb)" {
        return Ok(Record::Prompt);
    }

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    let rest = &line[digits..];
    let token = if digits > 0 { line[..digits].parse().ok() } else { None };

    let Some(sigil) = rest.chars().next() else {
        return Ok(Record::Text(line.to_string()));
    };
    let body = &rest[sigil.len_utf8()..];

    match sigil {
        '~' | '@' | '&' if digits == 0 => Ok(Record::Stream(parse_stream(sigil, body))),
        '^' => parse_result_record(token, body).map(Record::Result),
        '*' => parse_async(token, body).map(Record::Exec),
        '=' => parse_async(token, body).map(Record::Notify),
        '+' => parse_async(token, body).map(Record::Status),
        _ => Ok(Record::Text(line.to_string())),
    }
}

/// Parse a comma separated `key=value` list, as found after a record class
pub fn parse_results(input: &str) -> Result<HashMap<String, Value>> {
    let mut scanner = Scanner::new(input);
    let results = scanner.results(None)?;
    scanner.skip_whitespace();
    if !scanner.at_end() {
        return Err(ParseError::Expected {
            expected: ',',
            offset: scanner.pos,
        });
    }
    Ok(results)
}

fn parse_stream(sigil: char, body: &str) -> StreamRecord {
    let stream_type = match sigil {
        '~' => StreamType::Console,
        '@' => StreamType::Target,
        _ => StreamType::Log,
    };
    let mut scanner = Scanner::new(body);
    let content = match scanner.c_string() {
        Ok(content) if scanner.at_end() => content,
        _ => body.to_string(),
    };
    StreamRecord {
        stream_type,
        content,
    }
}

fn split_class(body: &str) -> (&str, Option<&str>) {
    match body.find(',') {
        Some(comma) => (&body[..comma], Some(&body[comma + 1..])),
        None => (body, None),
    }
}

fn parse_result_record(token: Option<u64>, body: &str) -> Result<ResultRecord> {
    let (class_name, results) = split_class(body);
    let class = ResultClass::from_name(class_name)
        .ok_or_else(|| ParseError::UnknownResultClass(class_name.to_string()))?;
    let results = match results {
        Some(results) => parse_results(results)?,
        None => HashMap::new(),
    };
    Ok(ResultRecord {
        token,
        class,
        results,
    })
}

fn parse_async(token: Option<u64>, body: &str) -> Result<AsyncRecord> {
    let (class_name, results) = split_class(body);
    let results = match results {
        Some(results) => parse_results(results)?,
        None => HashMap::new(),
    };
    Ok(AsyncRecord {
        token,
        class: AsyncClass::from_name(class_name),
        results,
    })
}

/// Decode the C escapes GDB applies to string contents
///
/// Handles `\"`, `\\`, `\n`, `\t`, `\r` and octal byte escapes (`\303\251`).
/// Unknown escapes are kept verbatim.
pub fn unescape_c_string(raw: &str) -> String {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut utf8 = [0u8; 4];

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('\\') => bytes.push(b'\\'),
            Some('"') => bytes.push(b'"'),
            Some(d @ '0'..='7') => {
                let mut code = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(next) => {
                            code = code * 8 + next;
                            chars.next();
                        }
                        None => break,
                    }
                }
                bytes.push((code & 0xff) as u8);
            }
            Some(other) => {
                bytes.push(b'\\');
                bytes.extend_from_slice(other.encode_utf8(&mut utf8).as_bytes());
            }
            None => bytes.push(b'\\'),
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Inverse of [`unescape_c_string`] for the escapes that matter in commands
pub fn escape_c_string(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => Err(ParseError::Expected {
                expected,
                offset: self.pos - ch.len_utf8(),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    /// Results separated by commas, up to `end` (exclusive) or end of input
    fn results(&mut self, end: Option<char>) -> Result<HashMap<String, Value>> {
        let mut results = HashMap::new();
        loop {
            self.skip_whitespace();
            if self.at_end() || self.peek() == end {
                break;
            }
            match self.peek() {
                // Some GDB versions append key-less tuples after `bkpt={..}`
                Some('{') | Some('[') | Some('"') => {
                    self.value()?;
                }
                _ => {
                    let (key, value) = self.result()?;
                    results.entry(key).or_insert(value);
                }
            }
            self.skip_whitespace();
            if self.peek() == Some(',') {
                self.bump();
            } else {
                break;
            }
        }
        Ok(results)
    }

    fn result(&mut self) -> Result<(String, Value)> {
        let key = self.identifier()?;
        self.expect('=')?;
        let value = self.value()?;
        Ok((key, value))
    }

    fn identifier(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                self.bump();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(ParseError::EmptyIdentifier(start));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn value(&mut self) -> Result<Value> {
        match self.peek() {
            Some('"') => self.c_string().map(Value::String),
            Some('{') => {
                self.bump();
                let tuple = self.results(Some('}'))?;
                self.expect('}')?;
                Ok(Value::Tuple(tuple))
            }
            Some('[') => {
                self.bump();
                let list = self.list_items()?;
                self.expect(']')?;
                Ok(Value::List(list))
            }
            Some(_) => Err(ParseError::Expected {
                expected: '"',
                offset: self.pos,
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn list_items(&mut self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(']') | None => break,
                Some('"') | Some('{') | Some('[') => items.push(self.value()?),
                Some(_) => {
                    let (_, value) = self.result()?;
                    items.push(value);
                }
            }
            self.skip_whitespace();
            if self.peek() == Some(',') {
                self.bump();
            } else {
                break;
            }
        }
        Ok(items)
    }

    /// A quoted C string; the cursor must sit on the opening quote
    fn c_string(&mut self) -> Result<String> {
        let start = self.pos;
        self.expect('"')?;
        let body_start = self.pos;
        loop {
            match self.bump() {
                Some('\\') => {
                    if self.bump().is_none() {
                        return Err(ParseError::UnterminatedString(start));
                    }
                }
                Some('"') => break,
                Some(_) => {}
                None => return Err(ParseError::UnterminatedString(start)),
            }
        }
        Ok(unescape_c_string(&self.src[body_start..self.pos - 1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_c_string() {
        assert_eq!(unescape_c_string("Hello"), "Hello");
        assert_eq!(unescape_c_string("Hello\\nWorld"), "Hello\nWorld");
        assert_eq!(unescape_c_string("Hello\\\\World"), "Hello\\World");
        assert_eq!(unescape_c_string("Hello\\\"World\\\""), "Hello\"World\"");
        assert_eq!(unescape_c_string("a\\tb\\rc"), "a\tb\rc");
        assert_eq!(unescape_c_string("caf\\303\\251"), "café");
    }

    #[test]
    fn test_escape_round_trip() {
        for text in ["plain", "say \"hi\"", "C:\\dir\\file.cpp", "a\nb\tc\rd", "\\\"\\"] {
            assert_eq!(unescape_c_string(&escape_c_string(text)), text);
        }
    }

    #[test]
    fn test_backslash_before_quote_is_not_doubled_escape() {
        // "\\n" in the wire text is a backslash followed by n, not a newline
        assert_eq!(unescape_c_string("\\\\n"), "\\n");
    }

    #[test]
    fn test_parse_simple_results() {
        let results = parse_results("msg=\"test message\"").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["msg"].as_string(), Some("test message"));
    }

    #[test]
    fn test_quoted_separators_are_not_structural() {
        let results = parse_results(r#"value="{a, b}, [c]",name="x=1,y""#).unwrap();
        assert_eq!(results["value"].as_string(), Some("{a, b}, [c]"));
        assert_eq!(results["name"].as_string(), Some("x=1,y"));
    }

    #[test]
    fn test_parse_tuple_value() {
        let results = parse_results("bkpt={number=\"1\",type=\"breakpoint\"}").unwrap();
        let bkpt = results["bkpt"].as_tuple().unwrap();
        assert_eq!(bkpt["number"].as_string(), Some("1"));
        assert_eq!(results["bkpt"].field("type"), Some("breakpoint"));
    }

    #[test]
    fn test_parse_list_of_results() {
        let input = r#"stack=[frame={level="0",func="f"},frame={level="1",func="main"}]"#;
        let results = parse_results(input).unwrap();
        let frames = results["stack"].as_list().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].field("func"), Some("main"));
    }

    #[test]
    fn test_parse_nested_list_and_empty_containers() {
        let input = r#"frame={args=[{name="argc",value="1"}],empty={}},groups=["i1"],none=[]"#;
        let results = parse_results(input).unwrap();
        let args = results["frame"].as_tuple().unwrap()["args"].as_list().unwrap();
        assert_eq!(args[0].field("name"), Some("argc"));
        assert_eq!(results["groups"].as_list().unwrap()[0].as_string(), Some("i1"));
        assert!(results["none"].as_list().unwrap().is_empty());
    }

    #[test]
    fn test_keyless_tuples_after_bkpt_are_skipped() {
        let input = r#"bkpt={number="2",addr="<MULTIPLE>"},{number="2.1"},{number="2.2"}"#;
        let results = parse_results(input).unwrap();
        assert_eq!(results["bkpt"].field("number"), Some("2"));
    }

    #[test]
    fn test_malformed_results_fail() {
        assert!(parse_results("key=").is_err());
        assert!(parse_results("key=\"open").is_err());
        assert!(parse_results("bkpt={number=\"1\"").is_err());
    }

    #[test]
    fn test_parse_line_classification() {
        assert_eq!(parse_line("(gdb) ").unwrap(), Record::Prompt);
        assert!(matches!(parse_line("^done").unwrap(), Record::Result(_)));
        assert!(matches!(parse_line("*stopped,reason=\"x\"").unwrap(), Record::Exec(_)));
        assert!(matches!(parse_line("=thread-created,id=\"1\"").unwrap(), Record::Notify(_)));
        assert!(matches!(parse_line("+download,section=\".text\"").unwrap(), Record::Status(_)));
        assert_eq!(
            parse_line("Hello from the program").unwrap(),
            Record::Text("Hello from the program".into())
        );
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_parse_line_token_and_crlf() {
        match parse_line("42^done,value=\"7\"\r").unwrap() {
            Record::Result(result) => {
                assert_eq!(result.token, Some(42));
                assert_eq!(result.field("value"), Some("7"));
            }
            other => panic!("Expected result record, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_result_class() {
        assert_eq!(
            parse_line("^bogus"),
            Err(ParseError::UnknownResultClass("bogus".into()))
        );
    }

    #[test]
    fn test_stream_without_quotes_is_kept_raw() {
        match parse_line("~not quoted").unwrap() {
            Record::Stream(stream) => assert_eq!(stream.content, "not quoted"),
            other => panic!("Expected stream record, got {:?}", other),
        }
    }

    #[test]
    fn test_non_ascii_program_output_is_text() {
        assert_eq!(parse_line("é résultat").unwrap(), Record::Text("é résultat".into()));
        assert_eq!(parse_line("中文输出").unwrap(), Record::Text("中文输出".into()));
        assert_eq!(parse_line("42中文").unwrap(), Record::Text("42中文".into()));
    }

    #[test]
    fn test_multibyte_error_offset_is_a_char_boundary() {
        assert_eq!(
            parse_results("t={a=\"1\"é}"),
            Err(ParseError::Expected {
                expected: '}',
                offset: 8
            })
        );
        assert!(matches!(
            parse_line("^done,msg=é"),
            Err(ParseError::Expected { expected: '"', .. })
        ));
    }
}
