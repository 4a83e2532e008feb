//! Deterministic lattice enumeration through the public API.

use std::collections::BTreeMap;

use tasklattice_core::{ConflictPolicy, Lattice, ParamName, SubstitutionMap, ValueLiteral};

fn name(s: &str) -> ParamName {
    ParamName::new(s).unwrap()
}

fn int(v: i64) -> ValueLiteral {
    ValueLiteral::Int(v)
}

fn get(m: &SubstitutionMap, key: &str) -> i64 {
    match m[&name(key)] {
        ValueLiteral::Int(i) => i,
        ref other => panic!("expected int for {key}, got {other:?}"),
    }
}

fn grid() -> Lattice {
    let constants: SubstitutionMap = [(name("a"), int(1))].into_iter().collect::<BTreeMap<_, _>>();
    Lattice::new()
        .set_constants(constants, ConflictPolicy::Error)
        .add_product(name("b"), vec![int(10), int(20)])
        .add_zip(vec![
            (name("c"), vec![int(1), int(2)]),
            (name("d"), vec![int(3), int(4)]),
        ])
        .unwrap()
        .filter(|m| {
            !(matches!(m[&ParamName::new("b").unwrap()], ValueLiteral::Int(20))
                && matches!(m[&ParamName::new("c").unwrap()], ValueLiteral::Int(1)))
        })
}

#[test]
fn constants_product_zip_filter_yield_documented_rows() {
    let rows: Vec<(i64, i64, i64, i64)> = grid()
        .iter()
        .map(|r| r.unwrap())
        .map(|m| (get(&m, "a"), get(&m, "b"), get(&m, "c"), get(&m, "d")))
        .collect();

    assert_eq!(rows, vec![(1, 10, 1, 3), (1, 10, 2, 4), (1, 20, 2, 4)]);
}

#[test]
fn enumeration_is_stable_across_iterations_and_matches_tagged_order() {
    let lattice = grid();

    let first: Vec<SubstitutionMap> = lattice.iter().map(|r| r.unwrap()).collect();
    let second: Vec<SubstitutionMap> = lattice.iter().map(|r| r.unwrap()).collect();
    assert_eq!(first, second);

    let tagged: Vec<(String, SubstitutionMap)> = lattice
        .iter_with_ids("sweep-1")
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(tagged.len(), first.len());
    for ((id, tagged_map), plain_map) in tagged.iter().zip(&first) {
        assert_eq!(tagged_map, plain_map);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // Identifiers are unique per variant and stable across runs.
    let again: Vec<String> = lattice
        .iter_with_ids("sweep-1")
        .map(|r| r.unwrap().0)
        .collect();
    assert_eq!(
        tagged.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
        again
    );
}
