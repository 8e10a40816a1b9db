use bitflags::bitflags;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Génération du runtime visé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GameVersion {
    /// Avant 2.0.
    Gms1,
    /// 2.0 à 2.2.
    Gms2,
    /// 2.3 et suivants.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "gms2_3"))]
    Gms2_3,
}

bitflags! {
    /// Vue bit à bit d'une [`Target`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TargetFlags: u8 {
        /// Règles de chaînes GMS2 (`@"…"`, échappements).
        const GMS2          = 0b0000_0001;
        /// Sémantique 2.3 (fonctions, structs, booléens typés).
        const GMS2_3        = 0b0000_0010;
        /// Évaluation paresseuse de `and`/`or`.
        const SHORT_CIRCUIT = 0b0000_0100;
    }
}

/// Drapeaux de version qui pilotent lexer, compilateur et décompilateur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Target {
    /// Génération du runtime.
    pub version: GameVersion,
    /// Évaluation paresseuse des opérateurs logiques.
    pub short_circuit: bool,
    /// Id de format du conteneur.
    pub format_id: u8,
    /// Version du bytecode (15+).
    pub bytecode_version: u8,
}

impl Default for Target {
    fn default() -> Self {
        Self { version: GameVersion::Gms2_3, short_circuit: true, format_id: 17, bytecode_version: 17 }
    }
}

impl Target {
    /// Cible pour une génération, avec les valeurs usuelles associées.
    #[must_use]
    pub const fn for_version(version: GameVersion) -> Self {
        match version {
            GameVersion::Gms1 => Self { version, short_circuit: true, format_id: 15, bytecode_version: 15 },
            GameVersion::Gms2 => Self { version, short_circuit: true, format_id: 16, bytecode_version: 16 },
            GameVersion::Gms2_3 => Self { version, short_circuit: true, format_id: 17, bytecode_version: 17 },
        }
    }

    /// Vue bit à bit.
    #[must_use]
    pub fn flags(&self) -> TargetFlags {
        let mut f = TargetFlags::empty();
        if self.version >= GameVersion::Gms2 {
            f |= TargetFlags::GMS2;
        }
        if self.version >= GameVersion::Gms2_3 {
            f |= TargetFlags::GMS2_3;
        }
        if self.short_circuit {
            f |= TargetFlags::SHORT_CIRCUIT;
        }
        f
    }

    /// Règles GMS2 actives.
    #[must_use]
    pub fn is_gms2(&self) -> bool {
        self.version >= GameVersion::Gms2
    }

    /// Sémantique 2.3 active.
    #[must_use]
    pub fn is_gms2_3(&self) -> bool {
        self.version >= GameVersion::Gms2_3
    }

    /// Format ancien (id de format ≤ 14) : heuristiques de décompilation relâchées.
    #[must_use]
    pub const fn is_old_format(&self) -> bool {
        self.format_id <= 14
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_version() {
        let t = Target::default();
        assert!(t.flags().contains(TargetFlags::GMS2 | TargetFlags::GMS2_3 | TargetFlags::SHORT_CIRCUIT));
        let old = Target { short_circuit: false, ..Target::for_version(GameVersion::Gms1) };
        assert_eq!(old.flags(), TargetFlags::empty());
        assert!(Target::for_version(GameVersion::Gms2).is_gms2());
        assert!(!Target::for_version(GameVersion::Gms2).is_gms2_3());
    }

    #[test]
    fn target_from_json_uses_defaults() -> Result<(), serde_json::Error> {
        let t: Target = serde_json::from_str(r#"{ "version": "gms2", "short_circuit": false }"#)?;
        assert_eq!(t.version, GameVersion::Gms2);
        assert!(!t.short_circuit);
        assert_eq!(t.bytecode_version, 17);
        Ok(())
    }
}
