use std::path::Path;

use mzproteoform::{build_community, CommunityParams, ProteoformCommunity};
use mzproteoformer::{read_input, write_report, CommunityReport};

#[test]
fn test_report_roundtrip() {
    let input = read_input(Path::new("./tests/data/community.json")).unwrap();
    let mut params = CommunityParams::default();
    params.clustering.min_peak_count_ee = 1;
    params.clustering.min_peak_count_et = 2;
    let community = build_community(input, params).unwrap();
    let report = CommunityReport::from(community);

    let mut buffer = Vec::new();
    write_report(&mut buffer, &report).unwrap();
    let restored: CommunityReport = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(report, restored);

    let community: &ProteoformCommunity = &restored.community;
    assert!(community.is_built());
    for family in community.families() {
        for rel in family.relations.iter() {
            assert!(community.relations()[*rel].accepted);
        }
    }
}
