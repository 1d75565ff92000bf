use runlens_api::params::{parse_artifact_query, parse_repo_coordinate, repo_coordinate_from_path};
use runlens_api::{openapi_v1_spec, ApiErrorCode, ArtifactFormat};
use std::collections::BTreeMap;

fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn artifact_query_accepts_format_override() {
    let parsed = parse_artifact_query(
        "900",
        &query(&[("owner", "octo"), ("repo", "site"), ("format", "zip")]),
    )
    .expect("valid query");
    assert_eq!(parsed.format, Some(ArtifactFormat::Zip));
    assert_eq!(parsed.artifact.slug(), "octo/site");
}

#[test]
fn invalid_owner_reports_the_offending_parameter() {
    let err = parse_repo_coordinate(&query(&[("owner", "bad/owner"), ("repo", "site")]))
        .expect_err("invalid owner");
    assert_eq!(err.code, ApiErrorCode::InvalidQueryParameter);
    assert_eq!(err.details["parameter"], "owner");
}

#[test]
fn path_coordinates_are_reported_as_path_parameters() {
    let err = repo_coordinate_from_path("octo", "..").expect_err("traversal repo");
    assert!(err.message.contains("path parameter"));
}

#[test]
fn openapi_lists_the_artifact_endpoint_with_413() {
    let spec = openapi_v1_spec();
    assert!(spec["paths"]["/artifacts/{artifactId}"]["get"]["responses"]["413"].is_object());
}
