// SPDX-License-Identifier: PMPL-1.0-or-later
//! GraphQL resolvers for the query root

use async_graphql::{Object, Result};

use crate::models::{sample_books, Book, QUOTE};

/// GraphQL Query root
pub struct QueryRoot;

#[Object(name = "Query")]
impl QueryRoot {
    /// List of books with title and author
    async fn books(&self) -> Result<Option<Vec<Book>>> {
        Ok(Some(sample_books()))
    }

    /// A quote about the passage of time
    async fn quote(&self) -> Result<Option<String>> {
        Ok(Some(QUOTE.to_string()))
    }
}
