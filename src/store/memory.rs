//! In-process [`ArticleStore`] for tests and offline runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use super::{
    AnalysisLogEntry, Article, ArticleStore, DailyStats, LogStatus, UpsertOutcome,
    RECENT_SENTIMENT_WINDOW,
};
use crate::analyze::AnalysisResult;
use crate::error::Result;
use crate::health::HealthCounts;
use crate::ingest::types::RawArticle;

#[derive(Default)]
struct Inner {
    articles: BTreeMap<i64, Article>,
    by_url: HashMap<String, i64>,
    logs: Vec<AnalysisLogEntry>,
    next_id: i64,
}

#[derive(Default)]
pub struct InMemoryArticleStore {
    inner: Mutex<Inner>,
}

impl InMemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.articles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn logs(&self) -> Vec<AnalysisLogEntry> {
        self.inner.lock().await.logs.clone()
    }
}

#[async_trait]
impl ArticleStore for InMemoryArticleStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, article: &RawArticle) -> Result<UpsertOutcome> {
        let mut g = self.inner.lock().await;
        if let Some(&article_id) = g.by_url.get(&article.url) {
            return Ok(UpsertOutcome {
                inserted: false,
                article_id,
            });
        }
        g.next_id += 1;
        let id = g.next_id;
        g.by_url.insert(article.url.clone(), id);
        g.articles.insert(
            id,
            Article {
                id,
                url: article.url.clone(),
                source: article.source.clone(),
                category: article.category.clone(),
                title: article.title.clone(),
                body: article.body.clone(),
                published_at: article.published_at,
                collected_at: Utc::now(),
                analysis: None,
            },
        );
        Ok(UpsertOutcome {
            inserted: true,
            article_id: id,
        })
    }

    async fn get(&self, id: i64) -> Result<Option<Article>> {
        Ok(self.inner.lock().await.articles.get(&id).cloned())
    }

    async fn fetch_unanalyzed(&self, limit: usize) -> Result<Vec<Article>> {
        let g = self.inner.lock().await;
        let mut pending: Vec<&Article> = g.articles.values().filter(|a| !a.is_analyzed()).collect();
        pending.sort_by(|a, b| (b.collected_at, b.id).cmp(&(a.collected_at, a.id)));
        Ok(pending.into_iter().take(limit).cloned().collect())
    }

    async fn attach_analysis(&self, id: i64, result: &AnalysisResult) -> Result<bool> {
        if !(0.0..=1.0).contains(&result.sentiment_score) {
            return Ok(false);
        }
        let mut g = self.inner.lock().await;
        match g.articles.get_mut(&id) {
            Some(a) if a.analysis.is_none() => {
                a.analysis = Some(result.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn log_analysis(&self, entry: &AnalysisLogEntry) -> Result<()> {
        self.inner.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn health_counts(&self) -> Result<HealthCounts> {
        let g = self.inner.lock().await;
        let since = Utc::now() - ChronoDuration::hours(24);

        let recent_logs = g.logs.iter().filter(|l| l.at >= since);
        let (mut ok, mut failed, mut ms_sum, mut ms_n) = (0u64, 0u64, 0u64, 0u64);
        for l in recent_logs {
            match l.status {
                LogStatus::Completed => {
                    ok += 1;
                    if let Some(ms) = l.processing_ms {
                        ms_sum += ms;
                        ms_n += 1;
                    }
                }
                LogStatus::Failed => failed += 1,
            }
        }

        let mut analyzed: Vec<&Article> = g.articles.values().filter(|a| a.is_analyzed()).collect();
        analyzed.sort_by(|a, b| {
            let ka = a.analysis.as_ref().map(|r| r.analyzed_at);
            let kb = b.analysis.as_ref().map(|r| r.analyzed_at);
            (kb, b.id).cmp(&(ka, a.id))
        });
        let mut recent_sentiment = BTreeMap::new();
        for a in analyzed.iter().take(RECENT_SENTIMENT_WINDOW) {
            if let Some(r) = &a.analysis {
                *recent_sentiment
                    .entry(r.sentiment.as_str().to_string())
                    .or_insert(0u64) += 1;
            }
        }

        Ok(HealthCounts {
            total_articles: g.articles.len() as u64,
            analyzed_articles: analyzed.len() as u64,
            articles_24h: g.articles.values().filter(|a| a.collected_at >= since).count() as u64,
            successful_analyses_24h: ok,
            failed_analyses_24h: failed,
            avg_processing_ms_24h: if ms_n == 0 {
                0.0
            } else {
                ms_sum as f64 / ms_n as f64
            },
            recent_sentiment,
        })
    }

    async fn daily_stats(&self, days: u32) -> Result<Vec<DailyStats>> {
        let g = self.inner.lock().await;
        let first_day = Utc::now().date_naive() - ChronoDuration::days(days.max(1) as i64 - 1);

        let mut per_day: BTreeMap<chrono::NaiveDate, (u64, u64, f64, u64)> = BTreeMap::new();
        for a in g.articles.values() {
            let day = a.collected_at.date_naive();
            if day < first_day {
                continue;
            }
            let e = per_day.entry(day).or_default();
            e.0 += 1;
            if let Some(r) = &a.analysis {
                e.1 += 1;
                e.2 += r.sentiment_score;
                e.3 += 1;
            }
        }

        Ok(per_day
            .into_iter()
            .rev()
            .map(|(day, (total, analyzed, score_sum, scored))| DailyStats {
                day,
                total,
                analyzed,
                avg_sentiment_score: (scored > 0).then(|| score_sum / scored as f64),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{Impact, Sentiment};

    fn raw(url: &str) -> RawArticle {
        RawArticle {
            source: "Test".into(),
            category: "Technology".into(),
            title: format!("title {url}"),
            body: "body".into(),
            url: url.into(),
            published_at: None,
        }
    }

    fn result(score: f64) -> AnalysisResult {
        AnalysisResult {
            summary_local: "s".into(),
            summary_en: "s".into(),
            sentiment: Sentiment::Positive,
            sentiment_score: score,
            topics: vec![],
            entities: vec![],
            impact: Impact::Low,
            analyzed_at: Utc::now(),
            processing_ms: 10,
        }
    }

    #[tokio::test]
    async fn second_upsert_of_same_url_is_noop() {
        let s = InMemoryArticleStore::new();
        let a = s.upsert(&raw("https://x/1")).await.unwrap();
        let b = s.upsert(&raw("https://x/1")).await.unwrap();
        assert!(a.inserted);
        assert!(!b.inserted);
        assert_eq!(a.article_id, b.article_id);
        assert_eq!(s.len().await, 1);
    }

    #[tokio::test]
    async fn attach_only_once_and_rejects_bad_score() {
        let s = InMemoryArticleStore::new();
        let id = s.upsert(&raw("https://x/1")).await.unwrap().article_id;
        assert!(!s.attach_analysis(id, &result(1.5)).await.unwrap());
        assert!(s.attach_analysis(id, &result(0.7)).await.unwrap());
        assert!(!s.attach_analysis(id, &result(0.2)).await.unwrap());
        assert!(!s.attach_analysis(999, &result(0.2)).await.unwrap());
        assert!(s.fetch_unanalyzed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unanalyzed_are_newest_first_and_limited() {
        let s = InMemoryArticleStore::new();
        for i in 0..5 {
            s.upsert(&raw(&format!("https://x/{i}"))).await.unwrap();
        }
        let got = s.fetch_unanalyzed(3).await.unwrap();
        let ids: Vec<i64> = got.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn health_counts_reflect_logs() {
        let s = InMemoryArticleStore::new();
        let id = s.upsert(&raw("https://x/1")).await.unwrap().article_id;
        s.attach_analysis(id, &result(0.9)).await.unwrap();
        s.log_analysis(&AnalysisLogEntry::completed(id, 40)).await.unwrap();
        s.log_analysis(&AnalysisLogEntry::failed(id, "boom")).await.unwrap();

        let c = s.health_counts().await.unwrap();
        assert_eq!(c.total_articles, 1);
        assert_eq!(c.analyzed_articles, 1);
        assert_eq!(c.successful_analyses_24h, 1);
        assert_eq!(c.failed_analyses_24h, 1);
        assert_eq!(c.avg_processing_ms_24h, 40.0);
        assert_eq!(c.recent_sentiment.get("positive"), Some(&1));
    }
}
