use futures::future::try_join_all;
use log::info;
use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::IngestError;
use crate::models::RawReview;
use crate::sources::StoreAdapter;

/// Requests every page in `pages` concurrently and flattens the results in page order.
///
/// With a `throttle`, page `n` is held back `throttle * (n - start)` before it is
/// issued. The first failing page fails the whole call.
pub async fn fetch_all_pages<F, Fut>(
    pages: RangeInclusive<u32>,
    throttle: Option<Duration>,
    fetch_page: F,
) -> Result<Vec<RawReview>, IngestError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<Vec<RawReview>, IngestError>>,
{
    let start = *pages.start();
    let requests = pages.map(|page| {
        let request = fetch_page(page);
        let delay = throttle.map(|d| d * (page - start));
        async move {
            if let Some(d) = delay.filter(|d| !d.is_zero()) {
                sleep(d).await;
            }
            request.await.map_err(|e| match e {
                IngestError::SourceFetch(msg) => IngestError::SourceFetch(format!("page {}: {}", page, msg)),
                other => IngestError::SourceFetch(format!("page {}: {}", page, other)),
            })
        }
    });
    let per_page = try_join_all(requests).await?;
    Ok(per_page.into_iter().flatten().collect())
}

/// Pulls the configured page range of one app through its store adapter.
pub async fn fetch_app_reviews(
    adapter: &dyn StoreAdapter,
    app_id: &str,
    pages: RangeInclusive<u32>,
) -> Result<Vec<RawReview>, IngestError> {
    let (first, last) = (*pages.start(), *pages.end());
    let reviews = fetch_all_pages(pages, adapter.throttle(), |page| adapter.reviews(app_id, page)).await?;
    info!(
        "fetched {} reviews for {} from {} pages {}..={}",
        reviews.len(),
        app_id,
        adapter.store_name(),
        first,
        last
    );
    Ok(reviews)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn page_review(page: u32, n: u32) -> RawReview {
        let mut review = RawReview {
            id: Some(format!("{}-{}", page, n)),
            text: Some(format!("review {} on page {}", n, page)),
            ..Default::default()
        };
        review.extra.insert("page".to_string(), json!(page));
        review
    }

    #[tokio::test]
    async fn flattens_in_page_order_regardless_of_completion_order() {
        let results = fetch_all_pages(0..=9, None, |page| async move {
            // later pages resolve first; page 3 well ahead of page 1
            sleep(Duration::from_millis(u64::from(10 - page) * 5)).await;
            Ok(vec![page_review(page, 0), page_review(page, 1)])
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 20);
        let order: Vec<String> = results.iter().map(|r| r.id.clone().unwrap()).collect();
        let expected: Vec<String> = (0..=9u32)
            .flat_map(|p| vec![format!("{}-0", p), format!("{}-1", p)])
            .collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn issues_exactly_one_request_per_page() {
        let calls = AtomicUsize::new(0);
        let results = fetch_all_pages(2..=5, None, |page| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(vec![page_review(page, 0)]) }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(results.first().unwrap().extra["page"], json!(2));
        assert_eq!(results.last().unwrap().extra["page"], json!(5));
    }

    #[tokio::test]
    async fn all_pages_are_in_flight_together() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        fetch_all_pages(0..=9, None, |page| {
            let (in_flight, peak) = (&in_flight, &peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![page_review(page, 0)])
            }
        })
        .await
        .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn one_failed_page_fails_the_aggregation() {
        let err = fetch_all_pages(0..=9, None, |page| async move {
            if page == 4 {
                Err(IngestError::SourceFetch("http 503".to_string()))
            } else {
                Ok(vec![page_review(page, 0)])
            }
        })
        .await
        .unwrap_err();
        match err {
            IngestError::SourceFetch(msg) => assert_eq!(msg, "page 4: http 503"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn throttle_staggers_requests() {
        let started = Instant::now();
        fetch_all_pages(0..=3, Some(Duration::from_millis(20)), |page| async move {
            Ok(vec![page_review(page, 0)])
        })
        .await
        .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
