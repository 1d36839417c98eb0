//! Polymorphic values carried by stream tags and message ports

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Interned-style symbol used for tag keys, source ids and message port names.
///
/// Cloning is a reference-count bump; equality compares the text.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "'{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&Symbol> for Symbol {
    fn from(s: &Symbol) -> Self {
        s.clone()
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// Tagged variant value exchanged between blocks.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Pmt {
    #[default]
    Null,
    Bool(bool),
    Long(i64),
    U64(u64),
    Double(f64),
    Symbol(Symbol),
    Blob(Arc<[u8]>),
    List(Vec<Pmt>),
    Dict(BTreeMap<Symbol, Pmt>),
    /// Discrete message: metadata plus an opaque payload
    Pdu {
        meta: BTreeMap<Symbol, Pmt>,
        data: Arc<[u8]>,
    },
}

impl Pmt {
    pub fn pdu(meta: BTreeMap<Symbol, Pmt>, data: impl Into<Arc<[u8]>>) -> Self {
        Pmt::Pdu {
            meta,
            data: data.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Pmt::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Pmt::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view; unsigned values that do not fit return `None`
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Pmt::Long(v) => Some(*v),
            Pmt::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Pmt::U64(v) => Some(*v),
            Pmt::Long(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Numeric view, widening integers
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Pmt::Double(v) => Some(*v),
            Pmt::Long(v) => Some(*v as f64),
            Pmt::U64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Pmt::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a key in a dict or in a PDU's metadata
    pub fn get(&self, key: &str) -> Option<&Pmt> {
        match self {
            Pmt::Dict(map) | Pmt::Pdu { meta: map, .. } => map.get(&Symbol::new(key)),
            _ => None,
        }
    }
}

impl From<bool> for Pmt {
    fn from(v: bool) -> Self {
        Pmt::Bool(v)
    }
}

impl From<i64> for Pmt {
    fn from(v: i64) -> Self {
        Pmt::Long(v)
    }
}

impl From<i32> for Pmt {
    fn from(v: i32) -> Self {
        Pmt::Long(i64::from(v))
    }
}

impl From<u64> for Pmt {
    fn from(v: u64) -> Self {
        Pmt::U64(v)
    }
}

impl From<f64> for Pmt {
    fn from(v: f64) -> Self {
        Pmt::Double(v)
    }
}

impl From<&str> for Pmt {
    fn from(v: &str) -> Self {
        Pmt::Symbol(Symbol::new(v))
    }
}

impl From<Symbol> for Pmt {
    fn from(v: Symbol) -> Self {
        Pmt::Symbol(v)
    }
}

impl From<Vec<u8>> for Pmt {
    fn from(v: Vec<u8>) -> Self {
        Pmt::Blob(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_equality_by_text() {
        let a = Symbol::new("freq");
        let b = Symbol::from(String::from("freq"));
        assert_eq!(a, b);
        assert_eq!(a, "freq");
        assert_eq!(format!("{}", a), "freq");
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Pmt::Long(-3).as_double(), Some(-3.0));
        assert_eq!(Pmt::Long(-3).as_u64(), None);
        assert_eq!(Pmt::U64(7).as_long(), Some(7));
        assert_eq!(Pmt::U64(u64::MAX).as_long(), None);
        assert_eq!(Pmt::from("x").as_double(), None);
    }

    #[test]
    fn test_pdu_metadata_lookup() {
        let mut meta = BTreeMap::new();
        meta.insert(Symbol::new("len"), Pmt::U64(3));
        let pdu = Pmt::pdu(meta, vec![1u8, 2, 3]);
        assert_eq!(pdu.get("len"), Some(&Pmt::U64(3)));
        assert_eq!(pdu.get("missing"), None);
        assert!(Pmt::default().is_null());
    }
}
