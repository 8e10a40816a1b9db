//! Liaisons différées d'instructions, indexées par position dans la liste
//! d'instructions de l'entrée.
//!
//! Un saut vaut `(cible - adresse) / 4` mots. `finish` vide la liste des
//! sites : un second appel ne modifie plus rien.

use gmlc_core::{Instruction, Value};
use smallvec::SmallVec;

type Sites = SmallVec<[usize; 4]>;

fn word_offset(from: u32, to: u32) -> i32 {
    let words = (i64::from(to) - i64::from(from)) / 4;
    i32::try_from(words).unwrap_or(if words < 0 { i32::MIN } else { i32::MAX })
}

/// Sauts vers une adresse connue plus tard.
#[derive(Debug, Clone, Default)]
pub struct ForwardPatch {
    sites: Sites,
}

impl ForwardPatch {
    /// Patch vide.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch contenant déjà un site.
    #[must_use]
    pub fn from_site(site: usize) -> Self {
        let mut p = Self::new();
        p.add(site);
        p
    }

    /// Ajoute l'instruction d'index `site`.
    pub fn add(&mut self, site: usize) {
        self.sites.push(site);
    }

    /// Vrai si aucun site n'attend.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Fait pointer chaque site vers `target`.
    pub fn finish(&mut self, code: &mut [Instruction], target: u32) {
        for site in self.sites.drain(..) {
            if let Some(ins) = code.get_mut(site) {
                ins.jump = word_offset(ins.address, target);
            }
        }
    }
}

/// Sauts vers une adresse fixée à la construction.
#[derive(Debug, Clone)]
pub struct BackwardPatch {
    target: u32,
    sites: Sites,
}

impl BackwardPatch {
    /// Patch visant `target`.
    #[must_use]
    pub fn new(target: u32) -> Self {
        Self { target, sites: Sites::new() }
    }

    /// Adresse visée.
    #[must_use]
    pub const fn target(&self) -> u32 {
        self.target
    }

    /// Ajoute l'instruction d'index `site`.
    pub fn add(&mut self, site: usize) {
        self.sites.push(site);
    }

    /// Résout les sites accumulés.
    pub fn finish(&mut self, code: &mut [Instruction]) {
        for site in self.sites.drain(..) {
            if let Some(ins) = code.get_mut(site) {
                ins.jump = word_offset(ins.address, self.target);
            }
        }
    }
}

/// Immédiats `Int32` recevant une adresse absolue (blocs `try`).
#[derive(Debug, Clone, Default)]
pub struct AddressPatch {
    sites: Sites,
}

impl AddressPatch {
    /// Patch vide.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute l'instruction d'index `site`.
    pub fn add(&mut self, site: usize) {
        self.sites.push(site);
    }

    /// Écrit `address` dans chaque site.
    pub fn finish(&mut self, code: &mut [Instruction], address: u32) {
        let value = i32::try_from(address).unwrap_or(i32::MAX);
        for site in self.sites.drain(..) {
            if let Some(ins) = code.get_mut(site) {
                ins.value = Value::Int32(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmlc_core::bytecode::assign_addresses;
    use gmlc_core::Opcode;
    use pretty_assertions::assert_eq;

    fn code(n: usize) -> Vec<Instruction> {
        let mut v = vec![Instruction::new(Opcode::B); n];
        assign_addresses(&mut v);
        v
    }

    #[test]
    fn forward_patch_points_every_site_at_target() {
        let mut c = code(4);
        let mut p = ForwardPatch::from_site(0);
        p.add(2);
        p.finish(&mut c, 16);
        assert_eq!(c[0].jump, 4);
        assert_eq!(c[2].jump, 2);
        assert_eq!(c[0].target(), 16);
        assert_eq!(c[2].target(), 16);
        assert!(p.is_empty());
    }

    #[test]
    fn second_finish_is_a_no_op() {
        let mut c = code(3);
        let mut p = ForwardPatch::from_site(1);
        p.finish(&mut c, 12);
        assert_eq!(c[1].jump, 2);
        p.finish(&mut c, 400);
        assert_eq!(c[1].jump, 2);
    }

    #[test]
    fn backward_patch_keeps_its_construction_target() {
        let mut c = code(5);
        let mut p = BackwardPatch::new(4);
        p.add(3);
        p.add(4);
        p.finish(&mut c);
        assert_eq!(c[3].jump, -2);
        assert_eq!(c[4].jump, -3);
        assert_eq!(p.target(), 4);
    }

    #[test]
    fn address_patch_writes_absolute_values() {
        let mut c = code(2);
        let mut p = AddressPatch::new();
        p.add(0);
        p.finish(&mut c, 96);
        assert_eq!(c[0].value, Value::Int32(96));
        assert_eq!(c[1].value, Value::None);
    }
}
