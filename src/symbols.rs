use bincode::{Decode, Encode};

/// Interns strings as dense `u32` IDs.
///
/// Symbols are kept sorted, so an ID is the rank of its string. This makes IDs, and thus every
/// iteration order derived from them, independent of the order symbols were observed in.
#[derive(Clone, Debug, Default, Decode, Encode, PartialEq, Eq)]
pub struct SymbolTable {
    symbols: Vec<String>,
}

impl SymbolTable {
    /// Creates a new table from arbitrary strings. Duplicates are removed.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        symbols.sort_unstable();
        symbols.dedup();
        Self { symbols }
    }

    /// Returns the ID of the given symbol.
    #[inline(always)]
    pub fn get(&self, symbol: &str) -> Option<u32> {
        self.symbols
            .binary_search_by(|s| s.as_str().cmp(symbol))
            .ok()
            .map(|i| i as u32)
    }

    /// Returns the string of the given ID.
    ///
    /// # Panics
    ///
    /// `id` must be smaller than [`SymbolTable::len()`].
    #[inline(always)]
    pub fn name(&self, id: u32) -> &str {
        &self.symbols[id as usize]
    }

    /// Returns `true` if the table contains the symbol.
    #[inline(always)]
    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    /// Returns the number of symbols.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` if the table has no symbol.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Iterates over symbols in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    /// Returns a new table containing the symbols of both tables.
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.iter().chain(other.iter()))
    }
}
