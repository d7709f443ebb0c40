use serde_json::Value;

use crate::config::Targets;

/// Votes of the target list linked to the target candidate in a tally document.
///
/// Candidate surname must match exactly, the list description only needs to
/// contain the configured substring. Both comparisons ignore case. Every
/// candidate with the surname is searched, in document order.
pub fn list_votes(tally: &Value, targets: &Targets) -> Option<u64> {
    let surname = targets.candidate_surname.to_uppercase();
    let needle = targets.list_substring.to_uppercase();

    candidates(tally)
        .filter(|c| field_upper(c, "cogn") == surname)
        .find_map(|c| {
            c.get("liste")?
                .as_array()?
                .iter()
                .find(|l| field_upper(l, "desc_lis_c").contains(&needle))
        })
        .and_then(votes)
}

/// Personal preference votes of the target candidate in a preference document.
pub fn preference_votes(prefs: &Value, targets: &Targets) -> Option<u64> {
    let surname = targets.preference_surname.to_uppercase();
    let given = targets.preference_given_name.to_uppercase();

    candidates(prefs)
        .find(|c| field_upper(c, "cogn") == surname && field_upper(c, "nome") == given)
        .and_then(votes)
}

fn candidates(doc: &Value) -> impl Iterator<Item = &Value> {
    doc.get("cand")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn field_upper(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_uppercase()
}

// Counts sometimes arrive as strings.
fn votes(v: &Value) -> Option<u64> {
    match v.get("voti")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn targets() -> Targets {
        Targets {
            candidate_surname: "STEFANI".into(),
            list_substring: "LEGA".into(),
            preference_surname: "ZAIA".into(),
            preference_given_name: "LUCA".into(),
        }
    }

    #[test]
    fn tally_finds_linked_list() {
        let doc = json!({
            "cand": [
                { "cogn": "MANILDO", "liste": [ { "desc_lis_c": "PARTITO DEMOCRATICO", "voti": 300 } ] },
                { "cogn": "Stefani", "liste": [
                    { "desc_lis_c": "FRATELLI D'ITALIA", "voti": 250 },
                    { "desc_lis_c": "Lega - Liga Veneta Stefani Presidente", "voti": 437 }
                ] }
            ]
        });
        assert_eq!(list_votes(&doc, &targets()), Some(437));
    }

    #[test]
    fn tally_without_candidate_is_none() {
        let doc = json!({
            "cand": [ { "cogn": "MANILDO", "liste": [ { "desc_lis_c": "LEGA", "voti": 10 } ] } ]
        });
        assert_eq!(list_votes(&doc, &targets()), None);
    }

    #[test]
    fn tally_without_matching_list_is_none() {
        let doc = json!({
            "cand": [ { "cogn": "STEFANI", "liste": [ { "desc_lis_c": "FORZA ITALIA", "voti": 10 } ] } ]
        });
        assert_eq!(list_votes(&doc, &targets()), None);
    }

    #[test]
    fn tally_searches_every_candidate_with_surname() {
        let doc = json!({
            "cand": [
                { "cogn": "STEFANI", "liste": [ { "desc_lis_c": "CIVICA PER IL VENETO", "voti": 5 } ] },
                { "cogn": "STEFANI", "liste": [ { "desc_lis_c": "LEGA - LIGA VENETA", "voti": 437 } ] }
            ]
        });
        assert_eq!(list_votes(&doc, &targets()), Some(437));
    }

    #[test]
    fn tally_shape_errors_are_none() {
        assert_eq!(list_votes(&json!({}), &targets()), None);
        assert_eq!(list_votes(&json!({ "cand": "x" }), &targets()), None);
        assert_eq!(list_votes(&json!({ "cand": [ { "cogn": "STEFANI" } ] }), &targets()), None);
        let no_votes = json!({ "cand": [ { "cogn": "STEFANI", "liste": [ { "desc_lis_c": "LEGA" } ] } ] });
        assert_eq!(list_votes(&no_votes, &targets()), None);
    }

    #[test]
    fn preference_ignores_order_and_case() {
        let doc = json!({
            "cand": [
                { "cogn": "rossi", "nome": "mario", "voti": 3 },
                { "cogn": "Zaia", "nome": "Marco", "voti": 7 },
                { "cogn": "zaia", "nome": "luca", "voti": 512 },
                { "cogn": "BIANCHI", "nome": "ANNA", "voti": 40 }
            ]
        });
        assert_eq!(preference_votes(&doc, &targets()), Some(512));
    }

    #[test]
    fn preference_requires_both_names() {
        let doc = json!({ "cand": [ { "cogn": "ZAIA", "nome": "MARCO", "voti": 9 } ] });
        assert_eq!(preference_votes(&doc, &targets()), None);
    }

    #[test]
    fn string_votes_are_parsed() {
        let doc = json!({ "cand": [ { "cogn": "ZAIA", "nome": "LUCA", "voti": " 12 " } ] });
        assert_eq!(preference_votes(&doc, &targets()), Some(12));
        let bad = json!({ "cand": [ { "cogn": "ZAIA", "nome": "LUCA", "voti": -1 } ] });
        assert_eq!(preference_votes(&bad, &targets()), None);
    }
}
