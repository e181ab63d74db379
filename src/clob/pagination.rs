//! Cursor pagination over the exchange's paged endpoints.

use std::future::Future;

use serde::Deserialize;

use crate::error::SdkError;

/// Cursor requesting the first page.
pub const INITIAL_CURSOR: &str = "MA==";

/// Cursor marking the end of the result set.
pub const END_CURSOR: &str = "LTE=";

/// One page of a cursor-paginated response.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub next_cursor: String,
}

/// Walks every page starting from [`INITIAL_CURSOR`], concatenating `data`.
///
/// Stops on [`END_CURSOR`], an empty cursor, or a cursor the server repeats
/// (a stuck server would otherwise loop forever).
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>, SdkError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>, SdkError>>,
{
    let mut items = Vec::new();
    let mut cursor = INITIAL_CURSOR.to_string();
    loop {
        let page = fetch(cursor.clone()).await?;
        items.extend(page.data);
        let next = page.next_cursor;
        if next.is_empty() || next == END_CURSOR || next == cursor {
            break;
        }
        cursor = next;
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_two_pages_concatenated() {
        let items: Vec<u32> = collect_pages(|cursor| async move {
            match cursor.as_str() {
                INITIAL_CURSOR => Ok(Page {
                    data: vec![1, 2],
                    next_cursor: "NEXT".to_string(),
                }),
                "NEXT" => Ok(Page {
                    data: vec![3],
                    next_cursor: END_CURSOR.to_string(),
                }),
                other => panic!("unexpected cursor {other}"),
            }
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_single_terminal_page() {
        let items: Vec<u32> = collect_pages(|_| async {
            Ok(Page {
                data: vec![9],
                next_cursor: END_CURSOR.to_string(),
            })
        })
        .await
        .unwrap();
        assert_eq!(items, vec![9]);
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops() {
        let items: Vec<u32> = collect_pages(|cursor| async move {
            assert_eq!(cursor, INITIAL_CURSOR);
            Ok(Page {
                data: vec![1],
                next_cursor: INITIAL_CURSOR.to_string(),
            })
        })
        .await
        .unwrap();
        assert_eq!(items, vec![1]);
    }

    #[tokio::test]
    async fn test_error_propagates() {
        let result: Result<Vec<u32>, _> =
            collect_pages(|_| async { Err(SdkError::validation("boom")) }).await;
        assert!(result.is_err());
    }
}
