use axum::extract::Query;
use axum::http::Uri;

use relay::server::dtos::channel_dto::ChannelQuery;

fn parse(query_string: &str) -> ChannelQuery {
    let uri: Uri = format!("/api/channels?{query_string}")
        .parse()
        .expect("uri");
    let Query(query) = Query::<ChannelQuery>::try_from_uri(&uri).expect("query accepted");
    query
}

#[test]
fn test_parses_numeric_offset_and_limit() {
    let normalized = parse("offset=20&limit=50").normalize();
    assert_eq!(normalized.offset, 20);
    assert_eq!(normalized.limit, 50);
}

#[test]
fn test_tolerates_junk_numeric_params() {
    // set-top boxes send whatever; junk must read as unset, not as a 400
    let normalized = parse("offset=abc&limit=%20").normalize();
    assert_eq!(normalized.offset, 0);
    assert_eq!(normalized.limit, 1000);

    let normalized = parse("offset=&limit=12.5").normalize();
    assert_eq!(normalized.offset, 0);
    assert_eq!(normalized.limit, 1000);
}

#[test]
fn test_clamps_out_of_range_values() {
    let normalized = parse("offset=-5&limit=999999").normalize();
    assert_eq!(normalized.offset, 0);
    assert_eq!(normalized.limit, 5000);

    let normalized = parse("limit=0").normalize();
    assert_eq!(normalized.limit, 1000);
}

#[test]
fn test_trims_and_lowercases_filters() {
    let normalized = parse("q=%20NEWS%20&group=%20Sports%20").normalize();
    assert_eq!(normalized.q, "news");
    assert_eq!(normalized.group, "Sports");
}
