use std::fmt;

/// Famille d'identifiant ; choisit le préfixe d'URL amont (/metar/… ou /device/…)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationKind {
    Metar,
    Device,
}

impl StationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationKind::Metar => "metar",
            StationKind::Device => "device",
        }
    }
}

impl fmt::Display for StationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// METAR : 4 lettres ASCII. Device : `d` + chiffres (≥ 11 caractères)
/// ou chiffres seuls (≥ 10 caractères). Tout le reste est invalide.
pub fn check_id(id: &str) -> Option<StationKind> {
    if id.len() == 4 && id.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Some(StationKind::Metar);
    }
    if let Some(rest) = id.strip_prefix('d') {
        if id.len() >= 11 && all_digits(rest) {
            return Some(StationKind::Device);
        }
    }
    if id.len() >= 10 && all_digits(id) {
        return Some(StationKind::Device);
    }
    None
}
