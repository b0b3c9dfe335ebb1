//! Token records, name rules, and validity checks.

use lumen_primitives::amount::{COIN, MAX_MONEY_TOKENS};
use lumen_primitives::encode::{Decodable, Encodable, Error as EncodeError};
use lumen_primitives::{Amount, BlockHash};
use std::io::{self, Read, Write};

pub const MAX_NAME_LENGTH: usize = 31;
pub const MIN_NAME_LENGTH: usize = 3;
pub const MAX_UNIT: i8 = 8;

pub const OWNER_TAG: char = '!';
pub const SUB_DELIMITER: char = '/';
pub const UNIQUE_DELIMITER: char = '#';
pub const USERNAME_PREFIX: char = '@';

/// Owner tokens are a single indivisible unit.
pub const OWNER_TOKEN_AMOUNT: i64 = COIN;
pub const UNIQUE_TOKEN_AMOUNT: i64 = COIN;
pub const UNIQUE_TOKEN_UNITS: i8 = 0;

/// Names that can never be issued.
const PROTECTED_NAMES: [&str; 2] = ["LUMEN", "LMN"];

/// What shape a token name takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenNameKind {
    Root,
    Sub,
    Unique,
    Owner,
    Username,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name is longer than {MAX_NAME_LENGTH} characters")]
    TooLong,

    #[error("name must contain at least {MIN_NAME_LENGTH} characters")]
    TooShort,

    #[error("name contains invalid characters")]
    InvalidCharacters,

    #[error("special characters can't open or close a name segment")]
    BadPunctuation,

    #[error("name is protected")]
    Protected,

    #[error("unique tag contains invalid characters")]
    BadUniqueTag,
}

fn is_root_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '_'
}

fn is_unique_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-@$%&*()[]{}_.?:".contains(c)
}

fn check_segment(segment: &str) -> Result<(), NameError> {
    if segment.is_empty() || !segment.chars().all(is_root_char) {
        return Err(NameError::InvalidCharacters);
    }
    let bytes = segment.as_bytes();
    let punct = |b: u8| b == b'.' || b == b'_';
    if punct(bytes[0]) || punct(bytes[bytes.len() - 1]) {
        return Err(NameError::BadPunctuation);
    }
    if bytes.windows(2).any(|w| punct(w[0]) && punct(w[1])) {
        return Err(NameError::BadPunctuation);
    }
    Ok(())
}

/// Root plus any `/`-separated sub segments, without a tag.
fn check_name_before_tag(name: &str) -> Result<(), NameError> {
    let mut parts = name.split(SUB_DELIMITER);
    let root = parts.next().expect("split yields at least one part");
    check_segment(root)?;
    if root.len() < MIN_NAME_LENGTH {
        return Err(NameError::TooShort);
    }
    if PROTECTED_NAMES.contains(&root) {
        return Err(NameError::Protected);
    }
    for part in parts {
        check_segment(part)?;
    }
    Ok(())
}

/// Classify and validate a token name.
pub fn token_name_kind(name: &str) -> Result<TokenNameKind, NameError> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(NameError::TooLong);
    }

    if let Some(tag_at) = name.find(UNIQUE_DELIMITER) {
        let (parent, tag) = name.split_at(tag_at);
        let tag = &tag[1..];
        check_name_before_tag(parent)?;
        if tag.is_empty()
            || !tag.chars().all(is_unique_tag_char)
            || tag.contains(UNIQUE_DELIMITER)
        {
            return Err(NameError::BadUniqueTag);
        }
        return Ok(TokenNameKind::Unique);
    }

    if let Some(parent) = name.strip_suffix(OWNER_TAG) {
        check_name_before_tag(parent)?;
        return Ok(TokenNameKind::Owner);
    }

    if let Some(rest) = name.strip_prefix(USERNAME_PREFIX) {
        if rest.len() < 4 {
            return Err(NameError::TooShort);
        }
        check_segment(rest)?;
        return Ok(TokenNameKind::Username);
    }

    // Roots and subs reserve one character for a future owner tag.
    if name.len() > MAX_NAME_LENGTH - 1 {
        return Err(NameError::TooLong);
    }
    check_name_before_tag(name)?;
    if name.contains(SUB_DELIMITER) {
        Ok(TokenNameKind::Sub)
    } else {
        Ok(TokenNameKind::Root)
    }
}

pub fn is_token_name_valid(name: &str) -> bool {
    token_name_kind(name).is_ok()
}

pub fn is_name_an_owner(name: &str) -> bool {
    matches!(token_name_kind(name), Ok(TokenNameKind::Owner))
}

/// Parent of a sub or unique name; roots return themselves.
pub fn parent_name(name: &str) -> Option<String> {
    match token_name_kind(name).ok()? {
        TokenNameKind::Sub => Some(name[..name.rfind(SUB_DELIMITER)?].to_string()),
        TokenNameKind::Unique => Some(name[..name.rfind(UNIQUE_DELIMITER)?].to_string()),
        TokenNameKind::Root => Some(name.to_string()),
        _ => None,
    }
}

pub fn unique_token_name(parent: &str, tag: &str) -> Option<String> {
    let name = format!("{parent}{UNIQUE_DELIMITER}{tag}");
    matches!(token_name_kind(&name), Ok(TokenNameKind::Unique)).then_some(name)
}

pub fn owner_token_name(name: &str) -> String {
    format!("{name}{OWNER_TAG}")
}

/// Amounts must be divisible by the token's smallest unit.
pub fn check_amount_with_units(amount: Amount, units: i8) -> bool {
    if !(0..=MAX_UNIT).contains(&units) {
        return false;
    }
    let quantum = 10_i64.pow((MAX_UNIT - units) as u32);
    amount.to_sat() % quantum == 0
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token name: {0}")]
    InvalidName(NameError),

    #[error("token amount out of range")]
    AmountOutOfRange,

    #[error("amount not divisible by the token's smallest unit")]
    AmountNotDivisible,

    #[error("units must be between 0 and {MAX_UNIT}")]
    BadUnits,

    #[error("unique tokens are a single indivisible unit and never reissuable")]
    BadUniqueShape,

    #[error("token name can't carry the owner tag")]
    OwnerTagInIssue,

    #[error("token '{0}' has already been issued")]
    DuplicateIssue(String),

    #[error("token '{0}' does not exist")]
    TokenNotFound(String),

    #[error("token '{0}' is not reissuable")]
    NotReissuable(String),

    #[error("reissue units may only increase")]
    UnitsDecrease,

    #[error("insufficient balance of '{name}' at {address}: have {have}, need {need}")]
    InsufficientBalance {
        name: String,
        address: String,
        have: Amount,
        need: Amount,
    },

    #[error("token '{name}' output is locked until {until}")]
    TokenLocked { name: String, until: u32 },

    #[error("script does not carry the expected token payload")]
    ScriptParse,

    #[error("token output pays to no extractable destination")]
    NoDestination,
}

/// A new token as carried in an issuance script.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IssueToken {
    pub name: String,
    pub amount: Amount,
    pub units: i8,
    pub reissuable: bool,
}

impl IssueToken {
    pub fn new(name: impl Into<String>, amount: Amount) -> Self {
        IssueToken {
            name: name.into(),
            amount,
            units: 0,
            reissuable: true,
        }
    }

    /// Full validity check against the name rules and amount constraints.
    /// Existence checks against live state happen in the cache layer.
    pub fn check_valid(&self) -> Result<TokenNameKind, TokenError> {
        let kind = token_name_kind(&self.name).map_err(TokenError::InvalidName)?;

        if kind == TokenNameKind::Owner {
            return Err(TokenError::OwnerTagInIssue);
        }

        if matches!(kind, TokenNameKind::Unique | TokenNameKind::Username) {
            let unique_shape = self.units == UNIQUE_TOKEN_UNITS
                && self.amount.to_sat() == UNIQUE_TOKEN_AMOUNT
                && !self.reissuable;
            if !unique_shape {
                return Err(TokenError::BadUniqueShape);
            }
        }

        if self.amount.to_sat() <= 0 || self.amount.to_sat() > MAX_MONEY_TOKENS {
            return Err(TokenError::AmountOutOfRange);
        }
        if !(0..=MAX_UNIT).contains(&self.units) {
            return Err(TokenError::BadUnits);
        }
        if !check_amount_with_units(self.amount, self.units) {
            return Err(TokenError::AmountNotDivisible);
        }

        Ok(kind)
    }
}

/// Movement of an existing token to an address, optionally bound until a
/// lock time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenTransfer {
    pub name: String,
    pub amount: Amount,
    pub token_lock_time: u32,
}

impl TokenTransfer {
    pub fn new(name: impl Into<String>, amount: Amount, token_lock_time: u32) -> Self {
        TokenTransfer {
            name: name.into(),
            amount,
            token_lock_time,
        }
    }

    pub fn check_valid(&self) -> Result<(), TokenError> {
        token_name_kind(&self.name).map_err(TokenError::InvalidName)?;
        if self.amount.to_sat() <= 0 {
            return Err(TokenError::AmountOutOfRange);
        }
        Ok(())
    }
}

/// Metadata mutation of an existing token. `units == -1` leaves units
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReissueToken {
    pub name: String,
    pub amount: Amount,
    pub units: i8,
    pub reissuable: bool,
}

impl ReissueToken {
    /// Shape-only checks; the checks against current metadata live in the
    /// cache layer where that metadata is known.
    pub fn check_valid(&self) -> Result<(), TokenError> {
        token_name_kind(&self.name).map_err(TokenError::InvalidName)?;
        if self.amount.to_sat() < 0 {
            return Err(TokenError::AmountOutOfRange);
        }
        if self.units > MAX_UNIT || self.units < -1 {
            return Err(TokenError::BadUnits);
        }
        Ok(())
    }
}

/// What the metadata table stores per token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub token: IssueToken,
    pub height: i32,
    pub block_hash: BlockHash,
}

impl TokenMetadata {
    pub fn new(token: IssueToken, height: i32, block_hash: BlockHash) -> Self {
        TokenMetadata {
            token,
            height,
            block_hash,
        }
    }
}

/// Per-token undo record saved with each block that reissues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReissueUndo {
    pub name: String,
    pub changed_units: bool,
    pub previous_units: i8,
}

impl Encodable for IssueToken {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.name.encode_to(w)?;
        len += self.amount.encode_to(w)?;
        len += self.units.encode_to(w)?;
        len += (self.reissuable as i8).encode_to(w)?;
        // Reserved trailing byte.
        len += 0i8.encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for IssueToken {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        let name = String::decode_from(r)?;
        let amount = Amount::decode_from(r)?;
        let units = i8::decode_from(r)?;
        let reissuable = i8::decode_from(r)? != 0;
        let _reserved = i8::decode_from(r)?;
        Ok(IssueToken {
            name,
            amount,
            units,
            reissuable,
        })
    }
}

impl Encodable for TokenTransfer {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.name.encode_to(w)?;
        len += self.amount.encode_to(w)?;
        len += self.token_lock_time.encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for TokenTransfer {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(TokenTransfer {
            name: String::decode_from(r)?,
            amount: Amount::decode_from(r)?,
            token_lock_time: u32::decode_from(r)?,
        })
    }
}

impl Encodable for ReissueToken {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.name.encode_to(w)?;
        len += self.amount.encode_to(w)?;
        len += self.units.encode_to(w)?;
        len += (self.reissuable as i8).encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for ReissueToken {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(ReissueToken {
            name: String::decode_from(r)?,
            amount: Amount::decode_from(r)?,
            units: i8::decode_from(r)?,
            reissuable: i8::decode_from(r)? != 0,
        })
    }
}

impl Encodable for TokenMetadata {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.token.encode_to(w)?;
        len += self.height.encode_to(w)?;
        len += self.block_hash.encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for TokenMetadata {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(TokenMetadata {
            token: IssueToken::decode_from(r)?,
            height: i32::decode_from(r)?,
            block_hash: BlockHash::decode_from(r)?,
        })
    }
}

impl Encodable for ReissueUndo {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.name.encode_to(w)?;
        len += self.changed_units.encode_to(w)?;
        len += self.previous_units.encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for ReissueUndo {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(ReissueUndo {
            name: String::decode_from(r)?,
            changed_units: bool::decode_from(r)?,
            previous_units: i8::decode_from(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_primitives::encode::{deserialize, serialize};

    #[test]
    fn name_classification() {
        assert_eq!(token_name_kind("COPPER"), Ok(TokenNameKind::Root));
        assert_eq!(token_name_kind("COPPER/WIRE"), Ok(TokenNameKind::Sub));
        assert_eq!(token_name_kind("COPPER/WIRE/THIN"), Ok(TokenNameKind::Sub));
        assert_eq!(token_name_kind("COPPER#coin-1"), Ok(TokenNameKind::Unique));
        assert_eq!(token_name_kind("COPPER!"), Ok(TokenNameKind::Owner));
        assert_eq!(token_name_kind("COPPER/WIRE!"), Ok(TokenNameKind::Owner));
        assert_eq!(token_name_kind("@HANDLE"), Ok(TokenNameKind::Username));
    }

    #[test]
    fn name_rules_rejections() {
        assert_eq!(token_name_kind("AB"), Err(NameError::TooShort));
        assert_eq!(token_name_kind("copper"), Err(NameError::InvalidCharacters));
        assert_eq!(token_name_kind("_COPPER"), Err(NameError::BadPunctuation));
        assert_eq!(token_name_kind("COPPER_"), Err(NameError::BadPunctuation));
        assert_eq!(token_name_kind("COP__PER"), Err(NameError::BadPunctuation));
        assert_eq!(token_name_kind("LUMEN"), Err(NameError::Protected));
        assert_eq!(
            token_name_kind("COPPER#bad#tag"),
            Err(NameError::BadUniqueTag)
        );
        assert_eq!(token_name_kind("@ABC"), Err(NameError::TooShort));
        // Thirty-one characters of root: one must stay reserved for '!'.
        let long_root = "A".repeat(MAX_NAME_LENGTH);
        assert_eq!(token_name_kind(&long_root), Err(NameError::TooLong));
        // But a 31-char owner name is fine.
        let owner = format!("{}!", "A".repeat(MAX_NAME_LENGTH - 1));
        assert_eq!(token_name_kind(&owner), Ok(TokenNameKind::Owner));
    }

    #[test]
    fn parent_names() {
        assert_eq!(parent_name("COPPER/WIRE").as_deref(), Some("COPPER"));
        assert_eq!(parent_name("COPPER#tag").as_deref(), Some("COPPER"));
        assert_eq!(parent_name("COPPER").as_deref(), Some("COPPER"));
        assert_eq!(
            unique_token_name("COPPER", "serial-7").as_deref(),
            Some("COPPER#serial-7")
        );
        assert_eq!(unique_token_name("COPPER", "bad#tag"), None);
    }

    #[test]
    fn units_divisibility() {
        let one = Amount::from_sat(COIN);
        assert!(check_amount_with_units(one, 0));
        assert!(check_amount_with_units(one, 8));
        assert!(!check_amount_with_units(Amount::from_sat(COIN / 10), 0));
        assert!(check_amount_with_units(Amount::from_sat(COIN / 10), 1));
        assert!(check_amount_with_units(Amount::from_sat(1), 8));
        assert!(!check_amount_with_units(one, 9));
    }

    #[test]
    fn issue_validity() {
        let mut token = IssueToken::new("COPPER", Amount::from_sat(1000 * COIN));
        token.units = 2;
        assert_eq!(token.check_valid(), Ok(TokenNameKind::Root));

        let owner_tagged = IssueToken::new("COPPER!", Amount::from_sat(COIN));
        assert_eq!(owner_tagged.check_valid(), Err(TokenError::OwnerTagInIssue));

        let zero = IssueToken::new("COPPER", Amount::ZERO);
        assert_eq!(zero.check_valid(), Err(TokenError::AmountOutOfRange));

        let over = IssueToken::new("COPPER", Amount::from_sat(MAX_MONEY_TOKENS + 1));
        assert_eq!(over.check_valid(), Err(TokenError::AmountOutOfRange));

        let mut unique = IssueToken::new("COPPER#one", Amount::from_sat(UNIQUE_TOKEN_AMOUNT));
        unique.reissuable = false;
        assert_eq!(unique.check_valid(), Ok(TokenNameKind::Unique));

        let mut bad_unique = unique.clone();
        bad_unique.amount = Amount::from_sat(2 * COIN);
        assert_eq!(bad_unique.check_valid(), Err(TokenError::BadUniqueShape));
    }

    #[test]
    fn record_round_trips() {
        let issue = IssueToken {
            name: "COPPER/WIRE".to_string(),
            amount: Amount::from_sat(21_000 * COIN),
            units: 4,
            reissuable: true,
        };
        assert_eq!(
            deserialize::<IssueToken>(&serialize(&issue)).unwrap(),
            issue
        );

        let transfer = TokenTransfer::new("COPPER", Amount::from_sat(5 * COIN), 1_700_000_000);
        assert_eq!(
            deserialize::<TokenTransfer>(&serialize(&transfer)).unwrap(),
            transfer
        );

        let reissue = ReissueToken {
            name: "COPPER".to_string(),
            amount: Amount::from_sat(100 * COIN),
            units: -1,
            reissuable: false,
        };
        assert_eq!(
            deserialize::<ReissueToken>(&serialize(&reissue)).unwrap(),
            reissue
        );

        let metadata = TokenMetadata::new(issue, 42, BlockHash::all_zeros());
        assert_eq!(
            deserialize::<TokenMetadata>(&serialize(&metadata)).unwrap(),
            metadata
        );
    }
}
