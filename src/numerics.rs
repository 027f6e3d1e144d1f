//! The numeric <-> symbolic-name table.
//!
//! Per §6, the numeric table is data, not code: it lives in
//! `resources/codes.txt` (one `<code> <symbolic>` pair per line, `#`
//! comments allowed) and is parsed once into a lazily-initialized,
//! read-only map (the teacher's pattern of compile-time enums is not
//! reusable here, since the spec mandates an external, data-driven table).

use std::collections::HashMap;
use std::sync::OnceLock;

const CODES_TXT: &str = include_str!("../resources/codes.txt");

struct Table {
    code_to_symbol: HashMap<String, String>,
    symbol_to_code: HashMap<String, String>,
}

fn table() -> &'static Table {
    static TABLE: OnceLock<Table> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut code_to_symbol = HashMap::new();
        let mut symbol_to_code = HashMap::new();
        for line in CODES_TXT.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(code), Some(symbol)) = (parts.next(), parts.next()) else {
                continue;
            };
            let symbol = symbol.to_ascii_lowercase();
            code_to_symbol.insert(code.to_string(), symbol.clone());
            symbol_to_code.insert(symbol, code.to_string());
        }
        Table {
            code_to_symbol,
            symbol_to_code,
        }
    })
}

/// Look up the lowercase symbolic name for a three-digit numeric. Unknown
/// codes pass through as their own lowercased text (never fails).
pub fn symbol_for_code(code: &str) -> String {
    table()
        .code_to_symbol
        .get(code)
        .cloned()
        .unwrap_or_else(|| code.to_ascii_lowercase())
}

/// Look up the numeric code for a symbolic name. Unknown symbols pass
/// through as their own lowercased text.
pub fn code_for_symbol(symbol: &str) -> String {
    let lower = symbol.to_ascii_lowercase();
    table()
        .symbol_to_code
        .get(&lower)
        .cloned()
        .unwrap_or(lower)
}
