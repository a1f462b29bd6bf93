use std::fmt;

use url::Url;

use crate::models::SearchSpec;

/// Which listing conditions a search keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionFilter {
    /// Keep everything
    Any,
    /// Drop listings in "New" condition
    Used,
    /// Keep only "New" listings
    New,
}

impl ConditionFilter {
    pub fn from_accept_new(accept_new: bool) -> Self {
        if accept_new {
            ConditionFilter::Any
        } else {
            ConditionFilter::Used
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionFilter::Any => "any",
            ConditionFilter::Used => "used",
            ConditionFilter::New => "new",
        }
    }
}

impl fmt::Display for ConditionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search mode, chosen from the spec contents in priority order
#[derive(Debug, Clone, PartialEq)]
pub enum SearchMode {
    /// Direct lookup by catalog code (already cleaned)
    Code { code: String },
    /// Separate last-name and title fields
    TitleAuthor {
        title: String,
        author_lastname: Option<String>,
    },
    /// Whole catalog of an author; results need identity verification
    AuthorOnly,
}

impl SearchMode {
    pub fn name(&self) -> &'static str {
        match self {
            SearchMode::Code { .. } => "code",
            SearchMode::TitleAuthor { .. } => "title+author",
            SearchMode::AuthorOnly => "author-only",
        }
    }
}

/// A fully-resolved marketplace query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub mode: SearchMode,
    /// Full author name as given in the spec
    pub author: String,
    pub year: Option<i32>,
    pub keywords: Option<String>,
    /// Passed to the marketplace, which does not reliably honour it
    pub max_price: Option<f64>,
    pub condition: ConditionFilter,
}

impl SearchQuery {
    pub fn from_spec(spec: &SearchSpec) -> Self {
        let mode = if let Some(code) = spec.code.as_deref().filter(|c| !c.trim().is_empty()) {
            SearchMode::Code {
                code: clean_code(code),
            }
        } else if let Some(title) = spec.title.as_deref().filter(|t| !t.trim().is_empty()) {
            SearchMode::TitleAuthor {
                title: title.trim().to_string(),
                author_lastname: author_lastname(&spec.author),
            }
        } else {
            SearchMode::AuthorOnly
        };

        Self {
            mode,
            author: spec.author.trim().to_string(),
            year: spec.year,
            keywords: spec.keywords.clone().filter(|k| !k.trim().is_empty()),
            max_price: spec.max_price,
            condition: ConditionFilter::from_accept_new(spec.accept_new),
        }
    }

    pub fn is_author_only(&self) -> bool {
        matches!(self.mode, SearchMode::AuthorOnly)
    }

    /// Build the request URL against the marketplace base.
    pub fn url(&self, base: &Url, currency: &str, destination: &str) -> Result<Url, url::ParseError> {
        let mut url = match &self.mode {
            SearchMode::Code { code } => base.join(&format!("/isbn/{code}/"))?,
            SearchMode::TitleAuthor { .. } | SearchMode::AuthorOnly => base.join("/search/")?,
        };

        {
            let mut pairs = url.query_pairs_mut();
            match &self.mode {
                SearchMode::Code { .. } => {
                    pairs.append_pair("viewAll", "true");
                    pairs.append_pair("currency", currency);
                    pairs.append_pair("destination", destination);
                }
                SearchMode::TitleAuthor {
                    title,
                    author_lastname,
                } => {
                    let author = author_lastname.as_deref().unwrap_or("");
                    self.append_advanced(&mut pairs, author, title, currency, destination);
                }
                SearchMode::AuthorOnly => {
                    self.append_advanced(&mut pairs, &self.author, "", currency, destination);
                }
            }
            if let Some(max_price) = self.max_price {
                pairs.append_pair("maxPrice", &max_price.to_string());
            }
        }

        Ok(url)
    }

    fn append_advanced(
        &self,
        pairs: &mut url::form_urlencoded::Serializer<'_, url::UrlQuery<'_>>,
        author: &str,
        title: &str,
        currency: &str,
        destination: &str,
    ) {
        pairs.append_pair("author", author);
        pairs.append_pair("title", title);
        pairs.append_pair("keywords", self.keywords.as_deref().unwrap_or(""));
        pairs.append_pair("isbn", "");
        pairs.append_pair("binding", "ANY");
        // Condition is filtered client-side; the marketplace always gets ANY.
        pairs.append_pair("condition", "ANY");
        pairs.append_pair("currency", currency);
        pairs.append_pair("destination", destination);
        pairs.append_pair("language", "ANY");
        pairs.append_pair("mode", "ADVANCED");
        pairs.append_pair("viewAll", "true");
        if let Some(year) = self.year {
            pairs.append_pair("publicationMinYear", &year.to_string());
            pairs.append_pair("publicationMaxYear", &year.to_string());
        }
    }

    pub fn describe(&self) -> String {
        match &self.mode {
            SearchMode::Code { code } => format!("code {code}"),
            SearchMode::TitleAuthor {
                title,
                author_lastname,
            } => format!(
                "{title} by {}",
                author_lastname.as_deref().unwrap_or("unknown author")
            ),
            SearchMode::AuthorOnly => format!("all books by {}", self.author),
        }
    }
}

/// Keep only digits and `X` from a catalog code.
pub fn clean_code(code: &str) -> String {
    code.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X')
        .collect()
}

/// Last name of the first author in a `;` or `,` separated list.
pub fn author_lastname(author: &str) -> Option<String> {
    author
        .split([';', ','])
        .next()
        .and_then(|first| first.split_whitespace().last())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.bookfinder.com").unwrap()
    }

    fn param(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn mode_priority_code_first() {
        let spec = SearchSpec {
            title: Some("Invisible Cities".into()),
            code: Some("978-0-15-645380-0".into()),
            ..SearchSpec::new("Italo Calvino")
        };
        let query = SearchQuery::from_spec(&spec);
        assert_eq!(
            query.mode,
            SearchMode::Code {
                code: "9780156453800".into()
            }
        );
    }

    #[test]
    fn mode_title_then_author_only() {
        let titled = SearchSpec {
            title: Some("Invisible Cities".into()),
            ..SearchSpec::new("Italo Calvino")
        };
        assert_eq!(
            SearchQuery::from_spec(&titled).mode,
            SearchMode::TitleAuthor {
                title: "Invisible Cities".into(),
                author_lastname: Some("Calvino".into()),
            }
        );

        let blank_title = SearchSpec {
            title: Some("   ".into()),
            ..SearchSpec::new("Italo Calvino")
        };
        assert_eq!(SearchQuery::from_spec(&blank_title).mode, SearchMode::AuthorOnly);
    }

    #[test]
    fn condition_follows_accept_new() {
        let mut spec = SearchSpec::new("Italo Calvino");
        assert_eq!(SearchQuery::from_spec(&spec).condition, ConditionFilter::Used);
        spec.accept_new = true;
        assert_eq!(SearchQuery::from_spec(&spec).condition, ConditionFilter::Any);
    }

    #[test]
    fn code_url() {
        let spec = SearchSpec {
            code: Some("0-15-645380-x".into()),
            max_price: Some(25.0),
            ..SearchSpec::new("Italo Calvino")
        };
        let url = SearchQuery::from_spec(&spec)
            .url(&base(), "USD", "US")
            .unwrap();
        assert_eq!(url.path(), "/isbn/015645380X/");
        assert_eq!(param(&url, "viewAll").as_deref(), Some("true"));
        assert_eq!(param(&url, "maxPrice").as_deref(), Some("25"));
        assert_eq!(param(&url, "author"), None);
    }

    #[test]
    fn title_author_url_uses_lastname_and_year() {
        let spec = SearchSpec {
            title: Some("Le città invisibili".into()),
            year: Some(1972),
            keywords: Some("first edition".into()),
            ..SearchSpec::new("Italo Calvino")
        };
        let url = SearchQuery::from_spec(&spec)
            .url(&base(), "USD", "US")
            .unwrap();
        assert_eq!(url.path(), "/search/");
        assert_eq!(param(&url, "author").as_deref(), Some("Calvino"));
        assert_eq!(param(&url, "title").as_deref(), Some("Le città invisibili"));
        assert_eq!(param(&url, "keywords").as_deref(), Some("first edition"));
        assert_eq!(param(&url, "mode").as_deref(), Some("ADVANCED"));
        assert_eq!(param(&url, "publicationMinYear").as_deref(), Some("1972"));
        assert_eq!(param(&url, "publicationMaxYear").as_deref(), Some("1972"));
        assert_eq!(param(&url, "maxPrice"), None);
    }

    #[test]
    fn author_only_url_uses_full_name() {
        let spec = SearchSpec::new("Bernardino Ciambelli");
        let url = SearchQuery::from_spec(&spec)
            .url(&base(), "EUR", "IT")
            .unwrap();
        assert_eq!(param(&url, "author").as_deref(), Some("Bernardino Ciambelli"));
        assert_eq!(param(&url, "title").as_deref(), Some(""));
        assert_eq!(param(&url, "currency").as_deref(), Some("EUR"));
        assert_eq!(param(&url, "destination").as_deref(), Some("IT"));
    }

    #[test]
    fn lastname_of_first_author() {
        assert_eq!(author_lastname("Italo Calvino").as_deref(), Some("Calvino"));
        assert_eq!(
            author_lastname("Umberto Eco; Italo Calvino").as_deref(),
            Some("Eco")
        );
        assert_eq!(author_lastname("Homer").as_deref(), Some("Homer"));
        assert_eq!(author_lastname("  "), None);
    }

    #[test]
    fn clean_code_strips_noise() {
        assert_eq!(clean_code("isbn 978-0-15"), "978015");
        assert_eq!(clean_code("abc"), "");
    }
}
