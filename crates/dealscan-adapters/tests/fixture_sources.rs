// Shipped fixtures must load for their own source and normalize cleanly.

use std::path::PathBuf;

use dealscan_adapters::{load_fixture_file, normalize};
use dealscan_core::Source;

fn fixture_path(source: Source) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source.as_str())
        .join("items.json")
}

#[test]
fn every_source_has_a_fixture_that_normalizes() {
    for source in Source::SWEEP_ORDER {
        let fixture = load_fixture_file(fixture_path(source)).unwrap();
        assert_eq!(fixture.source, source);
        assert!(!fixture.items.is_empty(), "{source} fixture is empty");

        let mut ids = Vec::new();
        for item in &fixture.items {
            let record = normalize(item, source).unwrap();
            assert_eq!(record.source, source);
            ids.push(record.external_id);
        }
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total, "{source} fixture has duplicate ids");
    }
}

#[test]
fn partner_fixture_keeps_text_metrics() {
    let fixture = load_fixture_file(fixture_path(Source::Partner)).unwrap();
    let zoo = fixture
        .items
        .iter()
        .map(|item| normalize(item, Source::Partner).unwrap())
        .find(|record| record.external_id == "45")
        .unwrap();
    assert_eq!(zoo.metrics.quantity_sold, 1450);
    assert_eq!(zoo.metrics.net_revenue, 21750.0);
    assert_eq!(zoo.metrics.margin, 15.0);
    assert_eq!(zoo.metrics.price, 25.0);
}
