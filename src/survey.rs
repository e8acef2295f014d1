use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::domain::{FipsCode, GeoKey};
use crate::error::CensusError;

pub const API_KEY_ENV: &str = "CENSUS_API_KEY";

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Every tract of every county in one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyQuery {
    pub dataset: String,
    pub vintage: u16,
    pub variables: Vec<String>,
    pub state: FipsCode,
    pub key: Option<String>,
}

impl SurveyQuery {
    /// Geography predicates in the API's `for`/`in` syntax.
    pub fn geography(&self) -> (String, String) {
        (
            "tract:*".to_string(),
            format!("state:{} county:*", self.state),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveyRow {
    pub geo: GeoKey,
    pub values: Vec<String>,
}

/// Survey response: one value per requested variable, indexed by `GeoKey`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurveyTable {
    pub variables: Vec<String>,
    pub rows: Vec<SurveyRow>,
}

impl SurveyTable {
    pub fn empty(variables: &[String]) -> Self {
        Self {
            variables: variables.to_vec(),
            rows: Vec::new(),
        }
    }
}

pub trait SurveyClient: Send + Sync {
    fn download(&self, query: &SurveyQuery) -> Result<SurveyTable, CensusError>;
}

pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

#[derive(Clone)]
pub struct CensusHttpClient {
    client: Client,
    base_url: String,
}

impl CensusHttpClient {
    pub fn new(base_url: &str) -> Result<Self, CensusError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("census-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CensusError::SurveyHttp(err.to_string()))?,
        );
        // The survey API is called without a timeout.
        let client = Client::builder()
            .default_headers(headers)
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| CensusError::SurveyHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, query: &SurveyQuery) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            query.vintage,
            dataset_path(&query.dataset)
        )
    }
}

impl SurveyClient for CensusHttpClient {
    fn download(&self, query: &SurveyQuery) -> Result<SurveyTable, CensusError> {
        let (for_clause, in_clause) = query.geography();
        let get = query.variables.join(",");
        let mut params = vec![
            ("get", get.as_str()),
            ("for", for_clause.as_str()),
            ("in", in_clause.as_str()),
        ];
        if let Some(key) = &query.key {
            params.push(("key", key.as_str()));
        }

        let response = self
            .client
            .get(self.endpoint(query))
            .query(&params)
            .send()
            .map_err(|err| CensusError::SurveyHttp(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| CensusError::SurveyHttp(err.to_string()))?;
        if !status.is_success() {
            return Err(CensusError::SurveyRejected {
                fips: query.state.to_string(),
                status: status.as_u16(),
                message: clean_error_body(&body),
            });
        }
        if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
            return Ok(SurveyTable::empty(&query.variables));
        }
        parse_response(&body, &query.variables)
    }
}

/// Maps a dataset short name to its path under the vintage.
pub fn dataset_path(dataset: &str) -> String {
    match dataset {
        "acs1" | "acs3" | "acs5" | "acsse" => format!("acs/{dataset}"),
        "acs1/subject" | "acs5/subject" | "acs1/profile" | "acs5/profile" => {
            format!("acs/{dataset}")
        }
        "sf1" | "sf3" | "pl" => format!("dec/{dataset}"),
        other => other.to_string(),
    }
}

/// Parses the API's JSON array-of-rows payload.
///
/// The first row is the header. Columns naming a requested variable carry
/// values; every other column is a geography level and becomes part of the
/// row's `GeoKey`, in header order.
pub fn parse_response(body: &str, variables: &[String]) -> Result<SurveyTable, CensusError> {
    let payload: Value =
        serde_json::from_str(body).map_err(|err| CensusError::SurveyResponse(err.to_string()))?;
    let Value::Array(rows) = payload else {
        return Err(CensusError::SurveyResponse(
            "expected a JSON array of rows".to_string(),
        ));
    };
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Ok(SurveyTable::empty(variables));
    };
    let header = string_row(header)?;

    let mut value_columns = Vec::with_capacity(variables.len());
    for variable in variables {
        let index = header
            .iter()
            .position(|column| column == variable)
            .ok_or_else(|| {
                CensusError::SurveyResponse(format!("response has no column {variable}"))
            })?;
        value_columns.push(index);
    }
    let geo_columns: Vec<usize> = (0..header.len())
        .filter(|index| !value_columns.contains(index))
        .collect();

    let mut table = SurveyTable::empty(variables);
    for row in rows {
        let row = string_row(row)?;
        if row.len() != header.len() {
            return Err(CensusError::SurveyResponse(format!(
                "row has {} columns, header has {}",
                row.len(),
                header.len()
            )));
        }
        let geo = geo_columns
            .iter()
            .map(|&index| (header[index].clone(), row[index].clone()))
            .collect();
        let values = value_columns
            .iter()
            .map(|&index| row[index].clone())
            .collect();
        table.rows.push(SurveyRow { geo, values });
    }
    Ok(table)
}

fn string_row(row: Value) -> Result<Vec<String>, CensusError> {
    let Value::Array(cells) = row else {
        return Err(CensusError::SurveyResponse(
            "expected each row to be an array".to_string(),
        ));
    };
    Ok(cells
        .into_iter()
        .map(|cell| match cell {
            Value::String(value) => value,
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

/// Strips HTML and collapses whitespace in an error payload.
pub fn clean_error_body(body: &str) -> String {
    let text = MARKUP.replace_all(body, " ");
    let text = WHITESPACE.replace_all(text.trim(), " ");
    if text.is_empty() {
        "request rejected".to_string()
    } else {
        text.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn parses_header_and_geo_columns() {
        let body = r#"[["B01001_001E","state","county","tract"],
                       ["4021","06","001","400100"],
                       ["3954","06","001","400200"]]"#;
        let table = parse_response(body, &vars(&["B01001_001E"])).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].values, vec!["4021"]);
        assert_eq!(table.rows[0].geo.tract_id(), "06001400100");
        assert_eq!(table.rows[1].geo.levels()[2].0, "tract");
    }

    #[test]
    fn values_follow_requested_order() {
        let body = r#"[["B01001_004E","B01001_003E","state","county","tract"],
                       ["20","10","01","001","020100"]]"#;
        let table = parse_response(body, &vars(&["B01001_003E", "B01001_004E"])).unwrap();
        assert_eq!(table.rows[0].values, vec!["10", "20"]);
    }

    #[test]
    fn header_only_is_empty_table() {
        let body = r#"[["B01001_001E","state","county","tract"]]"#;
        let table = parse_response(body, &vars(&["B01001_001E"])).unwrap();
        assert!(table.rows.is_empty());
        assert_eq!(table.variables, vec!["B01001_001E"]);
    }

    #[test]
    fn missing_variable_column_is_error() {
        let body = r#"[["NAME","state"],["Alabama","01"]]"#;
        assert!(parse_response(body, &vars(&["B01001_001E"])).is_err());
    }

    #[test]
    fn cleans_html_error() {
        let body = "<html><body><p>error: unknown variable 'B99999_001E'</p></body></html>";
        assert_eq!(
            clean_error_body(body),
            "error: unknown variable 'B99999_001E'"
        );
    }

    #[test]
    fn dataset_paths() {
        assert_eq!(dataset_path("acs5"), "acs/acs5");
        assert_eq!(dataset_path("sf1"), "dec/sf1");
    }
}
