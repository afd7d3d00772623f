use std::iter::Peekable;
use std::str::Chars;

use crate::error::{DecodeError, Location};

/// Tokens produced by the Gerber lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum GerberToken {
    /// One `*`-terminated statement inside a `%...%` block.
    /// Example: `"FSLAX24Y24"`, `"ADD10C,0.020"`, `"LPD"`
    Extended(String),
    /// A word command terminated by `*`.
    /// Example: `"D10"`, `"X100Y200D01"`, `"G01"`, `"M02"`
    Word(String),
    /// A `%AM...%` block: the macro name followed by its body statements.
    ApertureMacro {
        name: String,
        body: Vec<(Location, String)>,
    },
}

/// A token and where it starts in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub location: Location,
    pub token: GerberToken,
}

/// Character cursor that tracks line and column.
struct Cursor<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Read up to (not including) the next `*`, `%`, or end of input.
    /// Line breaks are dropped; other characters are kept verbatim.
    fn read_statement(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '*' || c == '%' {
                break;
            }
            self.bump();
            if c != '\n' && c != '\r' {
                text.push(c);
            }
        }
        text.trim().to_string()
    }
}

/// Tokenize a Gerber file into a sequence of tokens.
///
/// Gerber uses `*` as a statement terminator and `%...*%` for extended commands.
/// A `%` block may hold several statements; a block opening with `AM` is an
/// aperture macro and is returned whole.
pub fn tokenize(input: &str) -> Result<Vec<Token>, DecodeError> {
    let mut tokens = Vec::new();
    let mut cursor = Cursor::new(input);

    loop {
        cursor.skip_whitespace();
        let location = cursor.location();
        match cursor.peek() {
            None => break,
            Some('%') => {
                cursor.bump();
                let statements = read_extended_block(&mut cursor, location)?;
                push_extended(&mut tokens, statements);
            }
            Some(_) => {
                let word = cursor.read_statement();
                if cursor.peek() != Some('*') {
                    return Err(DecodeError::syntax(
                        location,
                        format!("command '{word}' is not terminated by '*'"),
                    ));
                }
                cursor.bump();
                let end_of_file = word == "M02";
                tokens.push(Token {
                    location,
                    token: GerberToken::Word(word),
                });
                // Anything after M02 is not part of the image.
                if end_of_file {
                    break;
                }
            }
        }
    }

    Ok(tokens)
}

/// Read the statements of a `%` block; the opening `%` is already consumed.
fn read_extended_block(
    cursor: &mut Cursor<'_>,
    start: Location,
) -> Result<Vec<(Location, String)>, DecodeError> {
    let mut statements = Vec::new();
    loop {
        cursor.skip_whitespace();
        let location = cursor.location();
        match cursor.peek() {
            None => {
                return Err(DecodeError::syntax(start, "unterminated '%' block"));
            }
            Some('%') => {
                cursor.bump();
                return Ok(statements);
            }
            Some('*') => {
                // Empty statement.
                cursor.bump();
            }
            Some(_) => {
                let text = cursor.read_statement();
                match cursor.peek() {
                    Some('*') => {
                        cursor.bump();
                        statements.push((location, text));
                    }
                    Some(_) => {
                        return Err(DecodeError::syntax(
                            location,
                            format!("extended command '{text}' is not terminated by '*'"),
                        ));
                    }
                    None => {
                        return Err(DecodeError::syntax(start, "unterminated '%' block"));
                    }
                }
            }
        }
    }
}

fn push_extended(tokens: &mut Vec<Token>, statements: Vec<(Location, String)>) {
    let mut statements = statements.into_iter();
    let Some((location, first)) = statements.next() else {
        return;
    };

    if let Some(name) = first.strip_prefix("AM") {
        tokens.push(Token {
            location,
            token: GerberToken::ApertureMacro {
                name: name.trim().to_string(),
                body: statements.collect(),
            },
        });
        return;
    }

    tokens.push(Token {
        location,
        token: GerberToken::Extended(first),
    });
    tokens.extend(statements.map(|(location, text)| Token {
        location,
        token: GerberToken::Extended(text),
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<GerberToken> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_simple_commands() {
        let input = "G01*\nD10*\nX100Y200D01*\nM02*\n";
        assert_eq!(
            kinds(input),
            vec![
                GerberToken::Word("G01".into()),
                GerberToken::Word("D10".into()),
                GerberToken::Word("X100Y200D01".into()),
                GerberToken::Word("M02".into()),
            ]
        );
    }

    #[test]
    fn test_extended_commands() {
        let input = "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,0.020*%\n";
        assert_eq!(
            kinds(input),
            vec![
                GerberToken::Extended("FSLAX24Y24".into()),
                GerberToken::Extended("MOMM".into()),
                GerberToken::Extended("ADD10C,0.020".into()),
            ]
        );
    }

    #[test]
    fn test_comment_is_kept() {
        let input = "G04 This is a comment*\nD10*\n";
        assert_eq!(
            kinds(input),
            vec![
                GerberToken::Word("G04 This is a comment".into()),
                GerberToken::Word("D10".into()),
            ]
        );
    }

    #[test]
    fn test_multiple_extended_in_one_block() {
        // Some files put multiple extended commands in one % block
        let input = "%FSLAX24Y24*MOMM*%\n";
        assert_eq!(
            kinds(input),
            vec![
                GerberToken::Extended("FSLAX24Y24".into()),
                GerberToken::Extended("MOMM".into()),
            ]
        );
    }

    #[test]
    fn test_aperture_macro_block() {
        let input = "%AMDONUT*\n1,1,$1,0,0*\n1,0,$2,0,0*%\n";
        let tokens = tokenize(input).unwrap();
        assert_eq!(tokens.len(), 1);
        match &tokens[0].token {
            GerberToken::ApertureMacro { name, body } => {
                assert_eq!(name, "DONUT");
                let texts: Vec<&str> = body.iter().map(|(_, s)| s.as_str()).collect();
                assert_eq!(texts, vec!["1,1,$1,0,0", "1,0,$2,0,0"]);
                assert_eq!(body[0].0, Location::new(2, 1));
            }
            other => panic!("expected macro, got {other:?}"),
        }
    }

    #[test]
    fn test_locations() {
        let input = "%MOMM*%\n  D10*\nX0Y0D03*";
        let tokens = tokenize(input).unwrap();
        assert_eq!(tokens[0].location, Location::new(1, 2));
        assert_eq!(tokens[1].location, Location::new(2, 3));
        assert_eq!(tokens[2].location, Location::new(3, 1));
    }

    #[test]
    fn test_line_break_inside_word() {
        assert_eq!(
            kinds("X100\nY200D01*"),
            vec![GerberToken::Word("X100Y200D01".into())]
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(kinds(""), Vec::<GerberToken>::new());
        assert_eq!(kinds("  \n\r\t  "), Vec::<GerberToken>::new());
    }

    #[test]
    fn test_unterminated_block() {
        let err = tokenize("%MOMM*\nD10*").unwrap_err();
        assert_eq!(err.location(), Some(Location::new(1, 1)));
    }

    #[test]
    fn test_word_without_terminator() {
        let err = tokenize("D10*\nM02").unwrap_err();
        assert!(matches!(err, DecodeError::Syntax { .. }));
        assert_eq!(err.location(), Some(Location::new(2, 1)));
    }

    #[test]
    fn test_stops_at_end_of_file() {
        assert_eq!(
            kinds("D10*M02*\n%broken"),
            vec![
                GerberToken::Word("D10".into()),
                GerberToken::Word("M02".into()),
            ]
        );
    }

    #[test]
    fn test_extended_statement_without_terminator() {
        assert!(tokenize("%MOMM%").is_err());
    }
}
