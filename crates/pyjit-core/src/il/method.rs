//! The packaged result of a successful compile (spec §3, §6).

use indexmap::IndexMap;

use crate::il::token::HelperToken;

/// One emitted call site: which token was called, where in the native
/// blob, and where in the IL stream it came from (useful for mapping a
/// crash back to source during debugging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub token: HelperToken,
    pub native_offset: u32,
    pub il_offset: u32,
}

/// The packaged result of compilation: entry address plus call-site and
/// symbol tables. Immutable once produced; lives until the host invalidates
/// the function (e.g. because its code object changed).
///
/// `symbol_table` uses an `IndexMap` rather than a plain hash map because
/// iteration order over symbols is observable in diagnostics output and
/// should match declaration order, mirroring the teacher's general
/// preference for `indexmap` wherever insertion order matters (e.g. dict
/// literal iteration order).
#[derive(Debug, Clone)]
pub struct JitMethod {
    /// Address of the native entry point. Calling convention:
    /// `(frame*, threadstate*) -> object*`, returning a null pointer to
    /// signal that an exception is set in the thread state.
    address: usize,
    symbol_table: IndexMap<String, u32>,
    call_sites: Vec<CallSite>,
}

impl JitMethod {
    #[must_use]
    pub fn new(address: usize, symbol_table: IndexMap<String, u32>, call_sites: Vec<CallSite>) -> Self {
        Self { address, symbol_table, call_sites }
    }

    #[must_use]
    pub const fn address(&self) -> usize {
        self.address
    }

    #[must_use]
    pub fn symbol_table(&self) -> &IndexMap<String, u32> {
        &self.symbol_table
    }

    #[must_use]
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_table_preserves_insertion_order() {
        let mut symbols = IndexMap::new();
        symbols.insert("entry".to_string(), 0);
        symbols.insert("epilogue".to_string(), 128);
        let method = JitMethod::new(0x1000, symbols, Vec::new());
        let names: Vec<_> = method.symbol_table().keys().collect();
        assert_eq!(names, vec!["entry", "epilogue"]);
    }
}
