//! Built-in VM size table and the name resolution rules shared by the
//! scanner and the `vm-specs` lookup tool.

use serde::Serialize;

use crate::error::{ScanError, ScanResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSpecs {
    pub vcpus: u32,
    #[serde(rename = "memoryGiB")]
    pub memory_gib: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecMatch {
    pub size: String,
    #[serde(flatten)]
    pub specs: VmSpecs,
    /// True when the figures come from the per-vCPU estimate, not the table.
    pub estimated: bool,
}

/// Memory assumed per vCPU when only a core count can be read from the name.
const ESTIMATED_GIB_PER_VCPU: f64 = 4.0;

const ESTIMATABLE_VCPU_COUNTS: &[u32] = &[2, 4, 8, 16, 32, 64, 128, 256];

/// Cleaned size key, vCPUs, memory in GiB. Order matters for partial matches
/// of equal length: earlier entries win.
const SPEC_TABLE: &[(&str, u32, f64)] = &[
    // B: burstable
    ("b1ls", 1, 0.5),
    ("b1s", 1, 1.0),
    ("b1ms", 1, 2.0),
    ("b2s", 2, 4.0),
    ("b2ms", 2, 8.0),
    ("b2ts", 2, 8.0),
    ("b4ms", 4, 16.0),
    ("b8ms", 8, 32.0),
    ("b12ms", 12, 48.0),
    ("b16ms", 16, 64.0),
    ("b20ms", 20, 80.0),
    // D: general purpose
    ("d1", 1, 3.5),
    ("d2", 2, 7.0),
    ("d3", 4, 14.0),
    ("d4", 8, 28.0),
    ("d5", 16, 56.0),
    ("d2s", 2, 8.0),
    ("d4s", 4, 16.0),
    ("d8s", 8, 32.0),
    ("d16s", 16, 64.0),
    ("d32s", 32, 128.0),
    ("d48s", 48, 192.0),
    ("d64s", 64, 256.0),
    ("d2ds", 2, 8.0),
    ("d4ds", 4, 16.0),
    ("d8ds", 8, 32.0),
    ("d16ds", 16, 64.0),
    ("d32ds", 32, 128.0),
    ("d48ds", 48, 192.0),
    ("d64ds", 64, 256.0),
    ("d2d", 2, 8.0),
    ("d4d", 4, 16.0),
    ("d8d", 8, 32.0),
    ("d16d", 16, 64.0),
    ("d32d", 32, 128.0),
    ("d48d", 48, 192.0),
    ("d64d", 64, 256.0),
    // E: memory optimized
    ("e2", 2, 16.0),
    ("e4", 4, 32.0),
    ("e8", 8, 64.0),
    ("e16", 16, 128.0),
    ("e20", 20, 160.0),
    ("e32", 32, 256.0),
    ("e48", 48, 384.0),
    ("e64", 64, 432.0),
    ("e96", 96, 672.0),
    ("e2s", 2, 16.0),
    ("e4s", 4, 32.0),
    ("e8s", 8, 64.0),
    ("e16s", 16, 128.0),
    ("e20s", 20, 160.0),
    ("e32s", 32, 256.0),
    ("e48s", 48, 384.0),
    ("e64s", 64, 432.0),
    ("e96s", 96, 672.0),
    ("e2ds", 2, 16.0),
    ("e4ds", 4, 32.0),
    ("e8ds", 8, 64.0),
    ("e16ds", 16, 128.0),
    ("e20ds", 20, 160.0),
    ("e32ds", 32, 256.0),
    ("e48ds", 48, 384.0),
    ("e64ds", 64, 432.0),
    ("e96ds", 96, 672.0),
    // F: compute optimized
    ("f2", 2, 4.0),
    ("f4", 4, 8.0),
    ("f8", 8, 16.0),
    ("f16", 16, 32.0),
    ("f32", 32, 64.0),
    ("f48", 48, 96.0),
    ("f64", 64, 128.0),
    ("f72", 72, 144.0),
    ("f2s", 2, 4.0),
    ("f4s", 4, 8.0),
    ("f8s", 8, 16.0),
    ("f16s", 16, 32.0),
    ("f32s", 32, 64.0),
    ("f48s", 48, 96.0),
    ("f64s", 64, 128.0),
    ("f72s", 72, 144.0),
    // M: large memory
    ("m8", 8, 218.0),
    ("m16", 16, 436.0),
    ("m32", 32, 872.0),
    ("m64", 64, 1742.0),
    ("m128", 128, 3892.0),
    ("m192", 192, 4096.0),
    ("m208", 208, 5700.0),
    ("m416", 416, 11400.0),
    ("m8ms", 8, 218.0),
    ("m16ms", 16, 436.0),
    ("m32ms", 32, 872.0),
    ("m64ms", 64, 1742.0),
    ("m128ms", 128, 3892.0),
    ("m192ms", 192, 4096.0),
    ("m208ms", 208, 5700.0),
    ("m416ms", 416, 11400.0),
    ("m8s", 8, 218.0),
    ("m16s", 16, 436.0),
    ("m32s", 32, 872.0),
    ("m64s", 64, 1742.0),
    ("m128s", 128, 3892.0),
    ("m192s", 192, 4096.0),
    ("m208s", 208, 5700.0),
    ("m416s", 416, 11400.0),
    // <vcpus>v<generation>
    ("2v3", 2, 8.0),
    ("4v3", 4, 16.0),
    ("8v3", 8, 32.0),
    ("16v3", 16, 64.0),
    ("32v3", 32, 128.0),
    ("64v3", 64, 256.0),
    ("96v3", 96, 384.0),
    ("2v4", 2, 8.0),
    ("4v4", 4, 16.0),
    ("8v4", 8, 32.0),
    ("16v4", 16, 64.0),
    ("32v4", 32, 128.0),
    ("64v4", 64, 256.0),
    ("96v4", 96, 384.0),
    ("2v5", 2, 8.0),
    ("4v5", 4, 16.0),
    ("8v5", 8, 32.0),
    ("16v5", 16, 64.0),
    ("32v5", 32, 128.0),
    ("64v5", 64, 256.0),
    ("96v5", 96, 384.0),
    // A: basic
    ("a0", 1, 0.75),
    ("a1", 1, 1.75),
    ("a2", 2, 3.5),
    ("a3", 4, 7.0),
    ("a4", 8, 14.0),
    ("a5", 2, 14.0),
    ("a6", 4, 28.0),
    ("a7", 8, 56.0),
    ("a8", 8, 56.0),
    ("a9", 16, 112.0),
    ("a10", 8, 56.0),
    ("a11", 16, 112.0),
    // NC / NV: GPU
    ("nc6", 6, 56.0),
    ("nc12", 12, 112.0),
    ("nc24", 24, 224.0),
    ("nc24r", 24, 224.0),
    ("nc6s", 6, 112.0),
    ("nc12s", 12, 224.0),
    ("nc24s", 24, 448.0),
    ("nc24rs", 24, 448.0),
    ("nc6sv3", 6, 112.0),
    ("nc12sv3", 12, 224.0),
    ("nc24sv3", 24, 448.0),
    ("nc24rsv3", 24, 448.0),
    ("nv6", 6, 56.0),
    ("nv12", 12, 112.0),
    ("nv24", 24, 224.0),
    ("nv6s", 6, 112.0),
    ("nv12s", 12, 224.0),
    ("nv24s", 24, 448.0),
    // H: HPC
    ("h8", 8, 56.0),
    ("h16", 16, 112.0),
    ("h8r", 8, 56.0),
    ("h16r", 16, 112.0),
    ("h8m", 8, 112.0),
    ("h16m", 16, 224.0),
    ("h16mr", 16, 224.0),
    // L: storage optimized
    ("l8s", 8, 64.0),
    ("l16s", 16, 128.0),
    ("l32s", 32, 256.0),
    ("l48s", 48, 384.0),
    ("l64s", 64, 512.0),
    ("l80s", 80, 640.0),
    // G
    ("g1", 2, 28.0),
    ("g2", 4, 56.0),
    ("g3", 8, 112.0),
    ("g4", 16, 224.0),
    ("g5", 32, 448.0),
    // specialized
    ("dasv4", 2, 8.0),
    ("easv4", 2, 16.0),
    ("fasv4", 2, 4.0),
    ("dcsv2", 2, 8.0),
    ("ecsv2", 2, 16.0),
    // <vcpus><letter>
    ("2a", 2, 4.0),
    ("4a", 4, 8.0),
    ("8a", 8, 16.0),
    ("16a", 16, 32.0),
    ("2d", 2, 8.0),
    ("4d", 4, 16.0),
    ("8d", 8, 32.0),
    ("16d", 16, 64.0),
    ("2e", 2, 16.0),
    ("4e", 4, 32.0),
    ("8e", 8, 64.0),
    ("16e", 16, 128.0),
    ("2f", 2, 4.0),
    ("4f", 4, 8.0),
    ("8f", 8, 16.0),
    ("16f", 16, 32.0),
    ("2m", 2, 16.0),
    ("4m", 4, 32.0),
    ("8m", 8, 64.0),
    ("16m", 16, 128.0),
    // very large instances
    ("416", 416, 5700.0),
    ("448", 448, 6144.0),
    ("480", 480, 6400.0),
    ("512", 512, 8192.0),
    ("576", 576, 9216.0),
    ("672", 672, 10752.0),
    ("768", 768, 12288.0),
    ("896", 896, 14336.0),
    ("1024", 1024, 16384.0),
];

fn entry_specs(entry: &(&str, u32, f64)) -> VmSpecs {
    VmSpecs {
        vcpus: entry.1,
        memory_gib: entry.2,
    }
}

/// Lowercases a size name and strips the tier prefix, `_v<n>` generation
/// suffixes, promo markers, underscores and spaces.
pub fn clean_size_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase().replace("standard_", "");
    let mut out = String::with_capacity(lower.len());
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' && bytes.get(i + 1) == Some(&b'v') {
            let digits = bytes[i + 2..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits > 0 {
                i += 2 + digits;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out.replace("promo", "").replace(['_', ' '], "")
}

/// Resolves vCPU and memory figures for a VM size or ARM SKU name.
pub fn resolve_specs(name: &str) -> Option<SpecMatch> {
    let clean = clean_size_name(name);
    if clean.is_empty() {
        return None;
    }

    if let Some(entry) = SPEC_TABLE.iter().find(|e| e.0 == clean) {
        return Some(table_match(entry));
    }

    let mut best: Option<&(&str, u32, f64)> = None;
    for entry in SPEC_TABLE.iter().filter(|e| clean.contains(e.0)) {
        if best.map_or(true, |b| entry.0.len() > b.0.len()) {
            best = Some(entry);
        }
    }
    if let Some(entry) = best {
        return Some(table_match(entry));
    }

    if let Some(token) = first_size_token(&clean) {
        if let Some(entry) = SPEC_TABLE.iter().find(|e| e.0 == token) {
            return Some(table_match(entry));
        }
    }

    let digits: String = clean
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let vcpus: u32 = digits.parse().ok()?;
    if ESTIMATABLE_VCPU_COUNTS.contains(&vcpus) {
        return Some(SpecMatch {
            size: clean,
            specs: VmSpecs {
                vcpus,
                memory_gib: f64::from(vcpus) * ESTIMATED_GIB_PER_VCPU,
            },
            estimated: true,
        });
    }
    None
}

fn table_match(entry: &(&str, u32, f64)) -> SpecMatch {
    SpecMatch {
        size: entry.0.to_string(),
        specs: entry_specs(entry),
        estimated: false,
    }
}

/// First `letters* digits+ letters*` run in the cleaned name.
fn first_size_token(clean: &str) -> Option<&str> {
    let bytes = clean.as_bytes();
    let first_digit = bytes.iter().position(|b| b.is_ascii_digit())?;
    let start = bytes[..first_digit]
        .iter()
        .rposition(|b| !b.is_ascii_lowercase())
        .map_or(0, |p| p + 1);
    let mut end = first_digit;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_lowercase() {
        end += 1;
    }
    Some(&clean[start..end])
}

/// Family names a query may stand for, most literal first, plus the
/// generation it asks for. `None` when the query reads as a size.
///
/// `nc` -> `[nc]`, `Dsv` -> `[dsv, ds]`, `DSv3` -> `[ds]` with generation 3.
fn family_candidates(query: &str) -> Option<(Vec<String>, Option<String>)> {
    let norm = query
        .trim()
        .to_ascii_lowercase()
        .replace("standard_", "")
        .replace(['_', ' ', '-'], "");
    let letters_end = norm
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(norm.len());
    let (letters, tail) = norm.split_at(letters_end);
    if letters.is_empty() {
        return None;
    }
    let base = letters.strip_suffix('v').filter(|b| !b.is_empty());

    if tail.is_empty() {
        let mut names = vec![letters.to_string()];
        names.extend(base.map(str::to_string));
        return Some((names, None));
    }
    if !tail.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    base.map(|b| (vec![b.to_string()], Some(tail.to_string())))
}

/// Splits a table key such as `nc6sv3` into family letters (`nc`), size
/// suffix (`s`) and generation (`3`). Keys without leading letters have no
/// family.
fn key_family(key: &str) -> Option<(&str, &str, Option<&str>)> {
    let letters_end = key.find(|c: char| !c.is_ascii_lowercase())?;
    if letters_end == 0 {
        return None;
    }
    let (letters, rest) = key.split_at(letters_end);
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let after = &rest[digits_end..];
    let suffix_end = after
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(after.len());
    let (suffix, generation) = after.split_at(suffix_end);
    if generation.is_empty() {
        return Some((letters, suffix, None));
    }
    let suffix = suffix.strip_suffix('v')?;
    Some((letters, suffix, Some(generation)))
}

fn family_members(name: &str, generation: Option<&str>) -> Vec<SpecMatch> {
    SPEC_TABLE
        .iter()
        .filter(|e| {
            key_family(e.0).is_some_and(|(letters, suffix, key_gen)| {
                let named = name == letters
                    || (name.len() == letters.len() + suffix.len()
                        && name.starts_with(letters)
                        && name.ends_with(suffix));
                let same_gen = match (generation, key_gen) {
                    (Some(want), Some(have)) => want == have,
                    _ => true,
                };
                named && same_gen
            })
        })
        .map(table_match)
        .collect()
}

/// Looks up a SKU (`Standard_D2s_v3`, `d2s`) or a family identifier (`nc`,
/// `Dsv`, `DSv3`).
///
/// A family identifier lists every size of that family; anything else
/// resolves to a single size.
pub fn lookup(query: &str) -> ScanResult<Vec<SpecMatch>> {
    if let Some((names, generation)) = family_candidates(query) {
        for name in &names {
            let members = family_members(name, generation.as_deref());
            if !members.is_empty() {
                return Ok(members);
            }
        }
    }

    resolve_specs(query)
        .map(|m| vec![m])
        .ok_or_else(|| ScanError::NotFound(query.to_string()))
}
