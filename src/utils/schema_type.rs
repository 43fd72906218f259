/// Source type fragments and the warehouse type they map to, checked in order.
///
/// `datetime` must come before `time` and `date`.
const SCHEMA_TYPES: &[(&str, &str)] = &[
    ("datetime", "TIMESTAMP"),
    ("timestamp", "TIMESTAMP"),
    ("bool", "BOOLEAN"),
    ("int", "INTEGER"),
    ("float", "FLOAT"),
    ("numeric", "FLOAT"),
    ("double", "FLOAT"),
    ("decimal", "FLOAT"),
    ("time", "TIME"),
    ("date", "DATE"),
];

/// Map a source column type to a warehouse type.
///
/// The first fragment contained in `schema_type` wins; anything unrecognised
/// is a `STRING`. Matching is case-sensitive.
pub fn parsed_schema_type(schema_type: &str) -> &'static str {
    SCHEMA_TYPES
        .iter()
        .find(|(fragment, _)| schema_type.contains(fragment))
        .map_or("STRING", |(_, parsed)| parsed)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("datetime64", "TIMESTAMP")]
    #[case("datetime64[ns, UTC]", "TIMESTAMP")]
    #[case("timestamp with time zone", "TIMESTAMP")]
    #[case("nullable_int", "INTEGER")]
    #[case("bigint", "INTEGER")]
    #[case("boolean", "BOOLEAN")]
    #[case("float64", "FLOAT")]
    #[case("numeric(10,2)", "FLOAT")]
    #[case("double precision", "FLOAT")]
    #[case("decimal", "FLOAT")]
    #[case("time", "TIME")]
    #[case("date", "DATE")]
    #[case("weird_enum", "STRING")]
    #[case("", "STRING")]
    #[case("INT", "STRING")]
    fn test_parsed_schema_type(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parsed_schema_type(input), expected);
    }

    #[test]
    fn test_first_match_wins() {
        // "interval" contains "int"
        assert_eq!(parsed_schema_type("interval"), "INTEGER");
        // "timestamp" is checked before "time"
        assert_eq!(parsed_schema_type("timestamptz"), "TIMESTAMP");
    }
}
