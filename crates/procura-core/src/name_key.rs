//! Name key normalisation for registry party and service names.
//!
//! The registry spells the same entity many ways ("Departamento de Salud",
//! "DEPARTAMENTO DE SALUD ", "Departamento  de  Salúd"). A name key collapses
//! that spelling noise so that `GROUP BY key` recovers one group per party.
//! Abbreviations ("Depto.") are not expanded.
//!
//! # Rules
//!
//! - Fold common Latin accents: á → a, é → e, ñ → n, ü → u, ...
//! - Lowercase ASCII.
//! - Drop every character outside `[0-9a-z]` (spaces, punctuation, symbols).

/// Normalise a display name into a grouping key.
///
/// Input: `"Servicios Legales, Inc."` → Output: `"servicioslegalesinc"`
///
/// Empty or symbol-only input yields an empty key.
pub fn name_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        let folded = fold_accent(ch).to_ascii_lowercase();
        if folded.is_ascii_lowercase() || folded.is_ascii_digit() {
            out.push(folded);
        }
    }
    out
}

/// Trim and collapse internal whitespace runs to a single space.
///
/// Used for the human-facing form of a name; the key is derived separately.
pub fn display_form(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}
