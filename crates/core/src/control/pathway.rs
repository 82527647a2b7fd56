//! Pathway blocks and card formatting
//!
//! Every line of a control file passes through [`PathwayBlock::card`], which
//! owns indentation, keyword width and numeric formatting. Numeric fields are
//! validated when the card is written, so a malformed value is reported with
//! its keyword instead of surfacing later as an opaque engine diagnostic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest card the engines accept
pub const MAX_CARD_LENGTH: usize = 512;

/// Indentation in front of every card
const CARD_INDENT: &str = "   ";

/// Which external program a control file configures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Meteorological preprocessor
    Preprocessor,
    /// Dispersion engine
    Dispersion,
}

impl Stage {
    /// Pathways of this stage in the order the engine reads them
    #[must_use]
    pub fn pathway_order(&self) -> &'static [Pathway] {
        match self {
            Stage::Preprocessor => &[Pathway::Job, Pathway::UpperAir, Pathway::Onsite, Pathway::MetPrep],
            Stage::Dispersion => &[
                Pathway::Control,
                Pathway::Source,
                Pathway::Receptor,
                Pathway::Meteorology,
                Pathway::Output,
            ],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preprocessor => write!(f, "preprocessor"),
            Stage::Dispersion => write!(f, "dispersion"),
        }
    }
}

/// Named section of a control file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pathway {
    /// `CO`: job control
    Control,
    /// `SO`: sources
    Source,
    /// `RE`: receptors
    Receptor,
    /// `ME`: meteorology
    Meteorology,
    /// `OU`: output
    Output,
    /// Preprocessor `JOB`
    Job,
    /// Preprocessor `UPPERAIR`
    UpperAir,
    /// Preprocessor `ONSITE`
    Onsite,
    /// Preprocessor `METPREP`
    MetPrep,
}

impl Pathway {
    /// Protocol name of the pathway
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Pathway::Control => "CO",
            Pathway::Source => "SO",
            Pathway::Receptor => "RE",
            Pathway::Meteorology => "ME",
            Pathway::Output => "OU",
            Pathway::Job => "JOB",
            Pathway::UpperAir => "UPPERAIR",
            Pathway::Onsite => "ONSITE",
            Pathway::MetPrep => "METPREP",
        }
    }

    /// Stage whose grammar this pathway belongs to
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Pathway::Control
            | Pathway::Source
            | Pathway::Receptor
            | Pathway::Meteorology
            | Pathway::Output => Stage::Dispersion,
            Pathway::Job | Pathway::UpperAir | Pathway::Onsite | Pathway::MetPrep => {
                Stage::Preprocessor
            }
        }
    }

    /// Column width the keyword is padded to
    fn keyword_width(&self) -> usize {
        match self.stage() {
            Stage::Dispersion => 8,
            Stage::Preprocessor => 10,
        }
    }

    fn header(&self) -> String {
        match self.stage() {
            Stage::Dispersion => format!("{} STARTING", self.code()),
            Stage::Preprocessor => self.code().to_string(),
        }
    }

    fn footer(&self) -> Option<String> {
        match self.stage() {
            Stage::Dispersion => Some(format!("{} FINISHED", self.code())),
            Stage::Preprocessor => None,
        }
    }
}

impl fmt::Display for Pathway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One value on a card
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Single whitespace-free token (identifiers, file names, options)
    Token(String),
    /// Free text running to the end of the card (titles)
    Text(String),
    /// Integer
    Int(i64),
    /// Fixed-precision decimal
    Decimal {
        /// Value
        value: f64,
        /// Digits after the decimal point
        places: usize,
        /// Reject values below zero
        non_negative: bool,
    },
}

impl Field {
    /// Whitespace-free token
    pub fn token(value: impl Into<String>) -> Self {
        Field::Token(value.into())
    }

    /// Free text
    pub fn text(value: impl Into<String>) -> Self {
        Field::Text(value.into())
    }

    /// Integer
    #[must_use]
    pub fn int(value: i64) -> Self {
        Field::Int(value)
    }

    /// Signed decimal with `places` digits
    #[must_use]
    pub fn decimal(value: f64, places: usize) -> Self {
        Field::Decimal {
            value,
            places,
            non_negative: false,
        }
    }

    /// Decimal that must not be negative (rates, heights, diameters)
    #[must_use]
    pub fn non_negative(value: f64, places: usize) -> Self {
        Field::Decimal {
            value,
            places,
            non_negative: true,
        }
    }

    fn render(&self, keyword: &str) -> Result<String, ProtocolError> {
        match self {
            Field::Token(token) => {
                if token.is_empty() || token.chars().any(char::is_whitespace) {
                    return Err(ProtocolError::InvalidToken {
                        keyword: keyword.to_string(),
                        token: token.clone(),
                    });
                }
                Ok(token.clone())
            }
            Field::Text(text) => {
                if text.contains(['\n', '\r']) {
                    return Err(ProtocolError::InvalidToken {
                        keyword: keyword.to_string(),
                        token: text.clone(),
                    });
                }
                Ok(text.clone())
            }
            Field::Int(value) => Ok(value.to_string()),
            Field::Decimal {
                value,
                places,
                non_negative,
            } => {
                if !value.is_finite() {
                    return Err(ProtocolError::NonFinite {
                        keyword: keyword.to_string(),
                        value: *value,
                    });
                }
                if *non_negative && *value < 0.0 {
                    return Err(ProtocolError::Negative {
                        keyword: keyword.to_string(),
                        value: *value,
                    });
                }
                Ok(format_decimal(*value, *places))
            }
        }
    }
}

/// Format with fixed precision, folding `-0.00` into `0.00`
#[must_use]
pub fn format_decimal(value: f64, places: usize) -> String {
    let text = format!("{value:.places$}");
    match text.strip_prefix('-') {
        Some(rest) if rest.bytes().all(|b| b == b'0' || b == b'.') => rest.to_string(),
        _ => text,
    }
}

/// Errors raised while building or assembling control files
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// NaN or infinite numeric field
    NonFinite {
        /// Card keyword
        keyword: String,
        /// Offending value
        value: f64,
    },
    /// Negative value in a field that must be non-negative
    Negative {
        /// Card keyword
        keyword: String,
        /// Offending value
        value: f64,
    },
    /// Empty token, token containing whitespace, or text with line breaks
    InvalidToken {
        /// Card keyword
        keyword: String,
        /// Offending text
        token: String,
    },
    /// Keyword empty or containing whitespace
    InvalidKeyword(String),
    /// Card longer than [`MAX_CARD_LENGTH`]
    CardTooLong {
        /// Card keyword
        keyword: String,
        /// Rendered length
        length: usize,
    },
    /// Block handed to a stage whose grammar does not contain it
    WrongStage {
        /// Pathway of the block
        pathway: Pathway,
        /// Stage being assembled
        stage: Stage,
    },
    /// Stage pathway not supplied
    MissingBlock {
        /// Stage being assembled
        stage: Stage,
        /// Missing pathway
        pathway: Pathway,
    },
    /// Same pathway supplied twice
    DuplicateBlock(Pathway),
    /// Receptor grid range/spacing unusable
    InvalidGrid {
        /// Grid half-width in metres
        range: f64,
        /// Grid spacing in metres
        spacing: f64,
    },
    /// Unknown averaging period
    InvalidPeriod(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::NonFinite { keyword, value } => {
                write!(f, "{keyword}: non-finite numeric field {value}")
            }
            ProtocolError::Negative { keyword, value } => {
                write!(f, "{keyword}: field must not be negative, got {value}")
            }
            ProtocolError::InvalidToken { keyword, token } => {
                write!(f, "{keyword}: invalid field '{token}'")
            }
            ProtocolError::InvalidKeyword(keyword) => write!(f, "invalid keyword '{keyword}'"),
            ProtocolError::CardTooLong { keyword, length } => write!(
                f,
                "{keyword}: card is {length} characters, limit is {MAX_CARD_LENGTH}"
            ),
            ProtocolError::WrongStage { pathway, stage } => {
                write!(f, "{pathway} pathway does not belong to the {stage} stage")
            }
            ProtocolError::MissingBlock { stage, pathway } => {
                write!(f, "{stage} control file is missing the {pathway} pathway")
            }
            ProtocolError::DuplicateBlock(pathway) => {
                write!(f, "{pathway} pathway supplied more than once")
            }
            ProtocolError::InvalidGrid { range, spacing } => write!(
                f,
                "receptor grid needs positive finite range and spacing (range {range}, spacing {spacing})"
            ),
            ProtocolError::InvalidPeriod(period) => write!(f, "unknown averaging period '{period}'"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Card {
    keyword: String,
    line: String,
}

/// Ordered card accumulator for one pathway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathwayBlock {
    pathway: Pathway,
    cards: Vec<Card>,
}

impl PathwayBlock {
    /// Empty block
    #[must_use]
    pub fn new(pathway: Pathway) -> Self {
        Self {
            pathway,
            cards: Vec::new(),
        }
    }

    /// Pathway this block belongs to
    #[must_use]
    pub fn pathway(&self) -> Pathway {
        self.pathway
    }

    /// Append a card
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if the keyword or any field is invalid, or
    /// the rendered card exceeds [`MAX_CARD_LENGTH`]. The block is left
    /// unchanged on error.
    pub fn card(&mut self, keyword: &str, fields: &[Field]) -> Result<&mut Self, ProtocolError> {
        let card = self.render_card(keyword, fields)?;
        self.cards.push(card);
        Ok(self)
    }

    /// Insert a card directly before the first card with keyword `before`,
    /// or append it when no such card exists
    ///
    /// # Errors
    /// Same conditions as [`PathwayBlock::card`].
    pub fn insert_before(&mut self, before: &str, keyword: &str, fields: &[Field]) -> Result<(), ProtocolError> {
        let card = self.render_card(keyword, fields)?;
        match self.position(before) {
            Some(index) => self.cards.insert(index, card),
            None => self.cards.push(card),
        }
        Ok(())
    }

    /// Move every card of `other` to the end of this block
    pub fn append(&mut self, other: PathwayBlock) {
        self.cards.extend(other.cards);
    }

    /// Index of the first card with `keyword`
    #[must_use]
    pub fn position(&self, keyword: &str) -> Option<usize> {
        self.cards.iter().position(|c| c.keyword == keyword)
    }

    /// Number of cards with `keyword`
    #[must_use]
    pub fn count(&self, keyword: &str) -> usize {
        self.cards.iter().filter(|c| c.keyword == keyword).count()
    }

    /// Number of cards
    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the block holds no cards
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Rendered cards with `keyword`, in order
    pub fn cards_with<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.cards
            .iter()
            .filter(move |c| c.keyword == keyword)
            .map(|c| c.line.as_str())
    }

    /// Every line of the block including pathway markers
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.cards.len() + 2);
        lines.push(self.pathway.header());
        lines.extend(self.cards.iter().map(|c| c.line.clone()));
        if let Some(footer) = self.pathway.footer() {
            lines.push(footer);
        }
        lines
    }

    /// Block text, lines joined with `\n`, no trailing newline
    #[must_use]
    pub fn render(&self) -> String {
        self.lines().join("\n")
    }

    fn render_card(&self, keyword: &str, fields: &[Field]) -> Result<Card, ProtocolError> {
        if keyword.is_empty() || keyword.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidKeyword(keyword.to_string()));
        }

        let mut line = format!("{CARD_INDENT}{keyword:<width$}", width = self.pathway.keyword_width());
        for field in fields {
            line.push(' ');
            line.push_str(&field.render(keyword)?);
        }

        if line.len() > MAX_CARD_LENGTH {
            return Err(ProtocolError::CardTooLong {
                keyword: keyword.to_string(),
                length: line.len(),
            });
        }
        Ok(Card {
            keyword: keyword.to_string(),
            line,
        })
    }
}
