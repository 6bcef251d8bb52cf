//! TargetProcess query construction
//!
//! Builds the `where` / `include` / `orderBy` / `take` fragments of a collection
//! request. A filter is either a pre-formatted expression or a list of
//! field = value conditions joined with ` and `.

use chrono::NaiveDate;

/// A value on the right-hand side of a `where` condition
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Date(NaiveDate),
    List(Vec<FilterValue>),
    Number(f64),
    Text(String),
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value as f64)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(value: NaiveDate) -> Self {
        FilterValue::Date(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FilterValue::Null, Into::into)
    }
}

/// Serialize a filter value as a single TargetProcess literal
pub fn format_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Null => "null".to_string(),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Date(date) => format!("'{}'", date.format("%Y-%m-%d")),
        FilterValue::List(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(","))
        }
        FilterValue::Number(n) => quote_text(&n.to_string()),
        FilterValue::Text(s) => quote_text(s),
    }
}

/// Strip one surrounding quote from each end, double inner single quotes
fn quote_text(raw: &str) -> String {
    let unquoted = raw.strip_prefix(['\'', '"']).unwrap_or(raw);
    let unquoted = unquoted.strip_suffix(['\'', '"']).unwrap_or(unquoted);
    format!("'{}'", unquoted.replace('\'', "''"))
}

/// `CustomField.X` becomes `cf_X`; every other field loses its whitespace
pub fn format_field(field: &str) -> String {
    match field.strip_prefix("CustomField.") {
        Some(custom) => format!("cf_{custom}"),
        None => field.chars().filter(|c| !c.is_whitespace()).collect(),
    }
}

/// The `where` part of a collection request
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Already formatted by the caller, sent as-is (URL-encoded)
    Expression(String),
    /// Field = value conditions, in insertion order
    Fields(Vec<(String, FilterValue)>),
}

impl Filter {
    pub fn expression(expr: impl Into<String>) -> Self {
        Filter::Expression(expr.into())
    }

    pub fn fields() -> Self {
        Filter::Fields(Vec::new())
    }

    /// Add a `field = value` condition; turns an expression filter into a field filter
    pub fn eq(self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        let mut conditions = match self {
            Filter::Fields(conditions) => conditions,
            Filter::Expression(_) => Vec::new(),
        };
        conditions.push((field.into(), value.into()));
        Filter::Fields(conditions)
    }

    /// Rendered expression, or `None` when there is nothing to filter on
    pub fn to_expression(&self) -> Option<String> {
        match self {
            Filter::Expression(expr) => Some(expr.clone()),
            Filter::Fields(conditions) if conditions.is_empty() => None,
            Filter::Fields(conditions) => Some(
                conditions
                    .iter()
                    .map(|(field, value)| format!("{}={}", format_field(field), format_value(value)))
                    .collect::<Vec<_>>()
                    .join(" and "),
            ),
        }
    }
}

/// A collection search against one entity type
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub entity_type: String,
    pub filter: Option<Filter>,
    pub include: Vec<String>,
    pub order_by: Vec<String>,
    pub take: u32,
}

impl SearchQuery {
    pub const DEFAULT_TAKE: u32 = 100;

    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            filter: None,
            include: Vec::new(),
            order_by: Vec::new(),
            take: Self::DEFAULT_TAKE,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn include<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = relations.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn take(mut self, take: u32) -> Self {
        self.take = take;
        self
    }

    /// Query string including the leading `?`
    pub fn to_query_string(&self) -> String {
        let mut params = Vec::new();
        if let Some(expr) = self.filter.as_ref().and_then(Filter::to_expression) {
            params.push(format!("where={}", encode_component(&expr)));
        }
        if let Some(include) = include_clause(&self.include) {
            params.push(include);
        }
        let order_by = non_blank(&self.order_by);
        if !order_by.is_empty() {
            params.push(format!("orderBy={}", order_by.join(",")));
        }
        params.push(format!("take={}", self.take));
        params.push("format=json".to_string());
        format!("?{}", params.join("&"))
    }
}

/// `include=[A,B]`, or `None` when every relation is blank
pub fn include_clause(include: &[String]) -> Option<String> {
    let relations = non_blank(include);
    if relations.is_empty() {
        None
    } else {
        Some(format!("include=[{}]", relations.join(",")))
    }
}

fn non_blank(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .collect()
}

/// Percent-encode a query component, leaving the same characters
/// untouched as a browser's `encodeURIComponent`
pub fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value_literals() {
        assert_eq!(format_value(&FilterValue::Null), "null");
        assert_eq!(format_value(&true.into()), "true");
        assert_eq!(format_value(&false.into()), "false");
        assert_eq!(format_value(&"Done".into()), "'Done'");
        assert_eq!(format_value(&42i64.into()), "'42'");
        assert_eq!(format_value(&2.5f64.into()), "'2.5'");
    }

    #[test]
    fn test_format_value_escapes_quotes() {
        assert_eq!(format_value(&"O'Brien".into()), "'O''Brien'");
        assert_eq!(format_value(&"'quoted'".into()), "'quoted'");
        assert_eq!(format_value(&"\"dq\"".into()), "'dq'");
        assert_eq!(format_value(&"'a'b'".into()), "'a''b'");
    }

    #[test]
    fn test_format_value_date_and_list() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(format_value(&date.into()), "'2024-03-09'");

        let list: FilterValue = vec!["a", "b'c"].into();
        assert_eq!(format_value(&list), "['a','b''c']");

        let nested = FilterValue::List(vec![
            FilterValue::Null,
            FilterValue::List(vec![true.into()]),
        ]);
        assert_eq!(format_value(&nested), "[null,[true]]");
    }

    #[test]
    fn test_format_field() {
        assert_eq!(format_field("CustomField.Risk Level"), "cf_Risk Level");
        assert_eq!(format_field("Entity State . Name"), "EntityState.Name");
        assert_eq!(format_field("Name"), "Name");
    }

    #[test]
    fn test_field_filter_joins_with_and() {
        let filter = Filter::fields()
            .eq("EntityState.Name", "Done")
            .eq("Team.Id", 50i64);
        assert_eq!(
            filter.to_expression().as_deref(),
            Some("EntityState.Name='Done' and Team.Id='50'")
        );
        assert_eq!(Filter::fields().to_expression(), None);
    }

    #[test]
    fn test_query_string_layout() {
        let query = SearchQuery::new("UserStory")
            .filter(Filter::expression("Name contains 'x y'"))
            .include(["Epic", " ", "Team"])
            .order_by(["Name", "", "Id"])
            .take(500);
        assert_eq!(
            query.to_query_string(),
            "?where=Name%20contains%20'x%20y'&include=[Epic,Team]&orderBy=Name,Id&take=500&format=json"
        );
    }

    #[test]
    fn test_query_string_without_optional_clauses() {
        let query = SearchQuery::new("Project").take(1);
        assert_eq!(query.to_query_string(), "?take=1&format=json");
    }

    #[test]
    fn test_encode_component_utf8() {
        assert_eq!(encode_component("é&="), "%C3%A9%26%3D");
    }
}
