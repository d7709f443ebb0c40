use std::fmt;

use serde::Serialize;

use crate::entity::{EntityCode, EntityKind, EntityRecord};

#[derive(Debug, Clone, Serialize)]
pub struct Province {
    pub name: String,
    pub code: String,
    pub raw_code: String,
    pub municipalities: Vec<Municipality>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Municipality {
    pub name: String,
    pub code: String,
    /// Province code decoded from the municipality's own entity code.
    /// Used to address its sections; it can differ from the enclosing province's.
    pub province_code: String,
    pub raw_code: String,
    pub sections: Vec<Section>,
}

impl Municipality {
    pub fn section_key(&self, section: &Section) -> SectionKey {
        SectionKey {
            province: self.province_code.clone(),
            municipality: self.code.clone(),
            section: section.code.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    /// Four-digit API code, e.g. `0001`.
    pub code: String,
    pub raw_code: String,
}

impl Section {
    /// Display number: the code without leading zeros.
    pub fn number(&self) -> &str {
        let trimmed = self.code.trim_start_matches('0');
        if trimmed.is_empty() { "0" } else { trimmed }
    }
}

/// API address of one section; also the identity used for resume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub province: String,
    pub municipality: String,
    pub section: String,
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.province, self.municipality, self.section)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Hierarchy {
    pub provinces: Vec<Province>,
}

impl Hierarchy {
    pub fn municipality_count(&self) -> usize {
        self.provinces.iter().map(|p| p.municipalities.len()).sum()
    }

    pub fn section_count(&self) -> usize {
        self.provinces
            .iter()
            .flat_map(|p| &p.municipalities)
            .map(|m| m.sections.len())
            .sum()
    }
}

/// Rebuild province → municipality → section from a pre-ordered flat list.
///
/// Each section attaches to the most recent province and municipality seen.
/// Ordering is trusted, not checked: sections before any municipality, and
/// municipalities before any province, are dropped. A repeated name replaces
/// the earlier entry in place.
pub fn build(records: &[EntityRecord]) -> Hierarchy {
    let mut provinces: Vec<Province> = Vec::new();
    let mut current_province: Option<usize> = None;
    let mut current_municipality: Option<usize> = None;

    for record in records {
        let Some(code) = EntityCode::decode(&record.code) else {
            continue;
        };
        let raw_code = code.encode();

        match record.kind {
            EntityKind::Province => {
                let province = Province {
                    name: record.name.clone(),
                    code: code.province,
                    raw_code,
                    municipalities: Vec::new(),
                };
                let idx = upsert(&mut provinces, province, |p| &p.name);
                current_province = Some(idx);
                current_municipality = None;
            }
            EntityKind::Municipality => {
                current_municipality = current_province.map(|p| {
                    let municipality = Municipality {
                        name: record.name.clone(),
                        code: code.municipality,
                        province_code: code.province,
                        raw_code,
                        sections: Vec::new(),
                    };
                    upsert(&mut provinces[p].municipalities, municipality, |m| &m.name)
                });
            }
            EntityKind::Section => {
                if let (Some(p), Some(m)) = (current_province, current_municipality) {
                    provinces[p].municipalities[m].sections.push(Section {
                        code: code.section,
                        raw_code,
                    });
                }
            }
            EntityKind::Region | EntityKind::Other => {}
        }
    }

    Hierarchy { provinces }
}

fn upsert<T>(items: &mut Vec<T>, item: T, name: impl Fn(&T) -> &String) -> usize {
    match items.iter().position(|x| name(x) == name(&item)) {
        Some(idx) => {
            items[idx] = item;
            idx
        }
        None => {
            items.push(item);
            items.len() - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(kind: EntityKind, name: &str, code: &str) -> EntityRecord {
        EntityRecord {
            kind,
            name: name.to_string(),
            code: code.to_string(),
        }
    }

    fn veneto() -> Vec<EntityRecord> {
        use EntityKind::*;
        vec![
            rec(Region, "VENETO", "0500000000000"),
            rec(Province, "VENEZIA", "0508700000000"),
            rec(Municipality, "VENEZIA", "0508704200000"),
            rec(Section, "1", "0508704200001"),
            rec(Section, "2", "0508704200002"),
            rec(Section, "3", "0508704200003"),
            rec(Municipality, "CHIOGGIA", "0508701000000"),
            rec(Section, "1", "0508701000001"),
            rec(Province, "PADOVA", "0506500000000"),
            rec(Municipality, "PADOVA", "0506505900000"),
            rec(Section, "10", "0506505900010"),
            rec(Section, "2", "0506505900002"),
        ]
    }

    #[test]
    fn builds_three_levels_in_input_order() {
        let h = build(&veneto());
        assert_eq!(h.provinces.len(), 2);
        assert_eq!(h.municipality_count(), 3);
        assert_eq!(h.section_count(), 6);

        let venezia = &h.provinces[0];
        assert_eq!(venezia.name, "VENEZIA");
        assert_eq!(venezia.code, "087");
        let comune = &venezia.municipalities[0];
        assert_eq!(comune.code, "0420");
        assert_eq!(comune.province_code, "087");
        let codes: Vec<&str> = comune.sections.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["0001", "0002", "0003"]);

        let padova = &h.provinces[1].municipalities[0];
        let codes: Vec<&str> = padova.sections.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["0010", "0002"]);
    }

    #[test]
    fn every_section_appears_exactly_once() {
        let records = veneto();
        let h = build(&records);
        let mut raw: Vec<&str> = h
            .provinces
            .iter()
            .flat_map(|p| &p.municipalities)
            .flat_map(|m| &m.sections)
            .map(|s| s.raw_code.as_str())
            .collect();
        raw.sort();
        let mut expected: Vec<&str> = records
            .iter()
            .filter(|r| r.kind == EntityKind::Section)
            .map(|r| r.code.as_str())
            .collect();
        expected.sort();
        assert_eq!(raw, expected);
    }

    #[test]
    fn out_of_order_records_are_dropped() {
        use EntityKind::*;
        let records = vec![
            rec(Section, "1", "0508704200001"),
            rec(Municipality, "ORPHAN", "0508704200000"),
            rec(Section, "1", "0508704200001"),
            rec(Province, "VENEZIA", "0508700000000"),
            // municipality pointer was reset by the province
            rec(Section, "2", "0508704200002"),
            rec(Municipality, "VENEZIA", "0508704200000"),
            rec(Section, "3", "0508704200003"),
        ];
        let h = build(&records);
        assert_eq!(h.provinces.len(), 1);
        assert_eq!(h.municipality_count(), 1);
        let sections = &h.provinces[0].municipalities[0].sections;
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].code, "0003");
    }

    #[test]
    fn undecodable_codes_are_skipped() {
        use EntityKind::*;
        let records = vec![
            rec(Province, "VENEZIA", "0508700000000"),
            rec(Municipality, "VENEZIA", "0508704200000"),
            rec(Section, "bad", "05087"),
            rec(Section, "1", "0508704200001"),
        ];
        let h = build(&records);
        assert_eq!(h.section_count(), 1);
    }

    #[test]
    fn municipality_keeps_its_own_province_code() {
        use EntityKind::*;
        let records = vec![
            rec(Province, "VENEZIA", "0508700000000"),
            rec(Municipality, "CAVARZERE", "0509900500000"),
            rec(Section, "1", "0509900500001"),
        ];
        let h = build(&records);
        assert_eq!(h.provinces[0].code, "087");
        assert_eq!(h.provinces[0].municipalities[0].province_code, "099");
    }

    #[test]
    fn section_number_strips_leading_zeros() {
        let s = |code: &str| Section {
            code: code.to_string(),
            raw_code: String::new(),
        };
        assert_eq!(s("0001").number(), "1");
        assert_eq!(s("0120").number(), "120");
        assert_eq!(s("0000").number(), "0");
    }

    #[test]
    fn section_key_uses_municipality_province_code() {
        use EntityKind::*;
        let records = vec![
            rec(Province, "VENEZIA", "0508700000000"),
            rec(Municipality, "CAVARZERE", "0509900500000"),
            rec(Section, "1", "0509900500001"),
        ];
        let h = build(&records);
        let m = &h.provinces[0].municipalities[0];
        assert_eq!(m.section_key(&m.sections[0]).to_string(), "099/0050/0001");
    }
}
