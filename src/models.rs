// SPDX-License-Identifier: PMPL-1.0-or-later
//! Data models served by the query API

use async_graphql::SimpleObject;
use serde::{Deserialize, Serialize};

/// A book in the sample catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct Book {
    pub title: Option<String>,
    pub author: Option<String>,
}

impl Book {
    pub fn new(title: &str, author: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            author: Some(author.to_string()),
        }
    }
}

/// Quote returned by `Query.quote`.
pub const QUOTE: &str = "The future is something which everyone reaches at the rate of sixty minutes an hour, whatever he does, whoever he is. ― C.S. Lewis";

/// Static catalogue returned by `Query.books`.
pub fn sample_books() -> Vec<Book> {
    vec![
        Book::new("A Game of Thrones", "George R. R. Martin"),
        Book::new("The Hobbit", "J. R. R. Tolkien"),
    ]
}
