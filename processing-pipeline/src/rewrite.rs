use common::{
    error::AppError,
    storage::types::{
        article::Article,
        site::{Site, SiteCategory},
    },
    utils::llm::ModelPair,
};
use serde::Deserialize;
use tracing::{debug, warn};
use whatlang::Lang;

use crate::llm_output::extract_json_payload;

/// Meta-summary budget, in characters.
pub const SUMMARY_MAX_CHARS: usize = 160;
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutput {
    pub title: String,
    pub content: String,
    pub summary: String,
    /// Always one of the site's categories when present.
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct QualityRewrite {
    rewritten_title: String,
    rewritten_content: String,
}

#[derive(Debug, Deserialize)]
struct FinalRewrite {
    title: String,
    content: String,
    #[serde(default, alias = "meta_description")]
    summary: String,
    #[serde(default)]
    category_id: serde_json::Value,
}

/// Two-pass rewrite: an optional same-language cleanup followed by the final
/// translate-and-optimize pass.
#[derive(Clone)]
pub struct Rewriter {
    models: ModelPair,
}

impl Rewriter {
    pub fn new(models: ModelPair) -> Self {
        Self { models }
    }

    #[tracing::instrument(skip_all, fields(article_id = %article.id, site_id = %site.id))]
    pub async fn rewrite(&self, article: &Article, site: &Site) -> Result<RewriteOutput, AppError> {
        let source_lang = source_language(article);
        let target_lang = site.target_language.as_str();
        let translating = !same_language(&source_lang, target_lang);

        let mut title = article.original_title.clone();
        let mut content = article.original_content.clone();

        if translating {
            match self.quality_pass(&title, &content, &source_lang).await {
                Ok(improved) => {
                    title = improved.rewritten_title;
                    content = improved.rewritten_content;
                }
                Err(err) => {
                    warn!(error = %err, "quality rewrite failed; continuing with original text");
                }
            }
        }

        let prompt = final_prompt(&title, &content, &source_lang, target_lang, translating, &site.categories);
        let response = self.models.complete(&prompt).await?;
        let parsed: FinalRewrite = extract_json_payload(&response)?;

        if parsed.title.trim().is_empty() || parsed.content.trim().is_empty() {
            return Err(AppError::LLMParsing(
                "rewrite returned an empty title or body".into(),
            ));
        }

        let category_id = parse_category_id(&parsed.category_id)
            .and_then(|id| match site.category(id) {
                Some(_) => Some(id),
                None => {
                    warn!(category_id = id, "model chose a category the site does not have");
                    None
                }
            });

        debug!(
            %source_lang,
            target_lang,
            translating,
            category_id,
            "rewrite completed"
        );

        Ok(RewriteOutput {
            title: parsed.title.trim().to_string(),
            content: parsed.content.trim().to_string(),
            summary: truncate_chars(parsed.summary.trim(), SUMMARY_MAX_CHARS),
            category_id,
        })
    }

    async fn quality_pass(
        &self,
        title: &str,
        content: &str,
        language: &str,
    ) -> Result<QualityRewrite, AppError> {
        let prompt = format!(
            "You are an experienced news editor. Rewrite the article below in the language \
             with code \"{language}\". Improve structure, clarity and flow, keep every fact, and \
             remove promotional or biased wording.\n\n\
             Title: {title}\n\nContent:\n{content}\n\n\
             Answer with JSON only: {{\"rewritten_title\": \"...\", \"rewritten_content\": \"...\"}}"
        );
        let response = self.models.complete(&prompt).await?;
        let parsed: QualityRewrite = extract_json_payload(&response)?;
        if parsed.rewritten_title.trim().is_empty() || parsed.rewritten_content.trim().is_empty() {
            return Err(AppError::LLMParsing("quality rewrite returned empty text".into()));
        }
        Ok(parsed)
    }
}

fn final_prompt(
    title: &str,
    content: &str,
    source_lang: &str,
    target_lang: &str,
    translating: bool,
    categories: &[SiteCategory],
) -> String {
    let task = if translating {
        format!("Translate the article below from \"{source_lang}\" to \"{target_lang}\" and rewrite it")
    } else {
        format!("Rewrite the article below in \"{target_lang}\"")
    };

    let category_block = if categories.is_empty() {
        String::from("Set \"category_id\" to null.")
    } else {
        let options = categories
            .iter()
            .map(|category| format!("{}: {}", category.id, category.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Pick the single best category for the article and put its numeric id in \
             \"category_id\". Available categories (id: name): {options}"
        )
    };

    format!(
        "You are a professional content writer. {task} so that it is engaging, well structured \
         and optimized for search engines. Keep all facts.\n\n\
         Title: {title}\n\nContent:\n{content}\n\n\
         {category_block}\n\n\
         Answer with JSON only: {{\"title\": \"...\", \"content\": \"... paragraphs ...\", \
         \"summary\": \"meta description under {SUMMARY_MAX_CHARS} characters\", \"category_id\": null}}"
    )
}

/// Language of the original text: the source's hint, else detected, else English.
pub fn source_language(article: &Article) -> String {
    if let Some(hint) = article
        .source_language
        .as_deref()
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
    {
        return primary_subtag(hint);
    }

    whatlang::detect(&article.original_content)
        .map(|info| iso_639_1(info.lang()))
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .to_ascii_lowercase()
}

fn same_language(a: &str, b: &str) -> bool {
    primary_subtag(a) == primary_subtag(b)
}

fn iso_639_1(lang: Lang) -> String {
    let code = match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Pol => "pl",
        Lang::Ces => "cs",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Nob => "no",
        Lang::Fin => "fi",
        Lang::Tur => "tr",
        Lang::Ell => "el",
        Lang::Ron => "ro",
        Lang::Hun => "hu",
        Lang::Ara => "ar",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        Lang::Ind => "id",
        Lang::Vie => "vi",
        Lang::Tha => "th",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        other => return other.code().to_string(),
    };
    code.to_string()
}

/// Accepts `12`, `"12"` and treats anything else as no choice.
fn parse_category_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Arc};

    use async_trait::async_trait;
    use common::{
        storage::types::{
            article::ArticleDraft,
            site::VelocityMode,
            source::{Source, SourceKind},
        },
        utils::{llm::LanguageModel, retry::RetryPolicy},
    };
    use tokio::sync::Mutex;

    use super::*;

    /// Answers prompts from a queue; an exhausted queue is a non-transient failure.
    struct QueuedModel {
        replies: Mutex<VecDeque<Result<String, AppError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl QueuedModel {
        fn new(replies: Vec<Result<String, AppError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for QueuedModel {
        async fn complete(&self, prompt: &str, _model: &str) -> Result<String, AppError> {
            self.prompts.lock().await.push(prompt.to_string());
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(AppError::LLMParsing("no scripted reply".into())))
        }
    }

    fn rewriter(model: &Arc<QueuedModel>) -> Rewriter {
        let model: Arc<dyn LanguageModel> = model.clone();
        Rewriter::new(ModelPair::new(
            model,
            "primary".into(),
            "fallback".into(),
            RetryPolicy::immediate(1),
        ))
    }

    fn site_with_categories(target: &str) -> Site {
        let mut site = Site::new(
            "Coast".into(),
            "https://coast.example".into(),
            "coast".into(),
            target.into(),
            VelocityMode::News,
        );
        site.categories = vec![
            SiteCategory { id: 3, name: "Weather".into() },
            SiteCategory { id: 7, name: "Politics".into() },
        ];
        site
    }

    fn article(language: Option<&str>) -> Article {
        let mut source = Source::new(
            "site-1".into(),
            "Wire".into(),
            SourceKind::Feed,
            "https://wire.example/rss".into(),
        );
        source.language = language.map(str::to_string);
        Article::new_pending(
            ArticleDraft {
                original_url: "https://wire.example/storm".into(),
                original_title: "Storm Hits Coast".into(),
                original_content: "Heavy rain lashed the shore on Monday night.".into(),
                original_image_url: None,
            },
            &source,
            "es".into(),
        )
    }

    #[tokio::test]
    async fn translating_runs_quality_pass_then_final_pass() {
        let model = Arc::new(QueuedModel::new(vec![
            Ok(r#"{"rewritten_title":"Storm Batters Coast","rewritten_content":"Rain fell."}"#.into()),
            Ok("```json\n{\"title\":\"Tormenta golpea la costa\",\"content\":\"Llovió.\",\"summary\":\"Resumen\",\"category_id\":\"3\"}\n```".into()),
        ]));

        let output = rewriter(&model)
            .rewrite(&article(Some("en")), &site_with_categories("es"))
            .await
            .expect("rewrite");

        assert_eq!(output.title, "Tormenta golpea la costa");
        assert_eq!(output.content, "Llovió.");
        assert_eq!(output.summary, "Resumen");
        assert_eq!(output.category_id, Some(3));

        let prompts = model.prompts.lock().await;
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Storm Batters Coast"));
        assert!(prompts[1].contains("3: Weather"));
    }

    #[tokio::test]
    async fn quality_pass_failure_falls_back_to_original_text() {
        let model = Arc::new(QueuedModel::new(vec![
            Ok("not json at all".into()),
            Err(AppError::LLMParsing("fallback also failed".into())),
            Ok(r#"{"title":"Tormenta","content":"Texto","summary":"","category_id":null}"#.into()),
        ]));

        let output = rewriter(&model)
            .rewrite(&article(Some("en")), &site_with_categories("es"))
            .await
            .expect("rewrite");

        assert_eq!(output.title, "Tormenta");
        assert_eq!(output.category_id, None);
        let prompts = model.prompts.lock().await;
        assert!(prompts[2].contains("Storm Hits Coast"));
    }

    #[tokio::test]
    async fn same_language_skips_quality_pass() {
        let model = Arc::new(QueuedModel::new(vec![Ok(
            r#"{"title":"Storm","content":"Body","summary":"Sum","category_id":99}"#.into(),
        )]));

        let output = rewriter(&model)
            .rewrite(&article(Some("es-ES")), &site_with_categories("es"))
            .await
            .expect("rewrite");

        assert_eq!(model.prompts.lock().await.len(), 1);
        assert_eq!(output.category_id, None, "unknown category ids are dropped");
    }

    #[tokio::test]
    async fn unparseable_final_pass_is_fatal() {
        let model = Arc::new(QueuedModel::new(vec![
            Ok("I'd rather not.".into()),
            Ok("Still no JSON.".into()),
        ]));

        let result = rewriter(&model)
            .rewrite(&article(Some("es")), &site_with_categories("es"))
            .await;

        assert!(matches!(result, Err(AppError::LLMParsing(_))));
    }

    #[test]
    fn summary_is_capped() {
        let long = "x".repeat(400);
        assert_eq!(truncate_chars(&long, SUMMARY_MAX_CHARS).chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn language_hint_wins_then_detection() {
        assert_eq!(source_language(&article(Some("pt-BR"))), "pt");

        let mut detected = article(None);
        detected.original_content =
            "El gobierno anunció nuevas medidas para proteger a los ciudadanos de la tormenta que \
             se aproxima a la costa durante el fin de semana."
                .into();
        assert_eq!(source_language(&detected), "es");
    }

    #[test]
    fn category_ids_accept_numbers_and_numeric_strings() {
        assert_eq!(parse_category_id(&serde_json::json!(4)), Some(4));
        assert_eq!(parse_category_id(&serde_json::json!(" 12 ")), Some(12));
        assert_eq!(parse_category_id(&serde_json::json!("null")), None);
        assert_eq!(parse_category_id(&serde_json::Value::Null), None);
    }
}
