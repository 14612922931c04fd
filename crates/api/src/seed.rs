//! Default FAQ seeding
//!
//! FAQ content is managed elsewhere; the core only consumes it. A fresh
//! deployment still needs a usable quick-question set, so a small default
//! catalogue is inserted at startup behind the `SEED_FAQ_DEFAULTS` flag.
//! Existing slugs are never overwritten.

use sqlx::PgPool;

struct DefaultFaq {
    slug: &'static str,
    question: &'static str,
    answer: &'static str,
    display_order: i32,
}

const DEFAULT_FAQ_ENTRIES: &[DefaultFaq] = &[
    DefaultFaq {
        slug: "delivery-date",
        question: "What is the delivery date?",
        answer: "Most orders are delivered in 3-5 business days based on your shipping location.",
        display_order: 1,
    },
    DefaultFaq {
        slug: "return-policy",
        question: "What is the return policy?",
        answer: "You can return unused items within 30 days of delivery for a full refund.",
        display_order: 2,
    },
    DefaultFaq {
        slug: "order-status",
        question: "Where is my order?",
        answer: "Share your order ID and I can help check the latest order tracking status.",
        display_order: 3,
    },
];

/// Insert any default FAQ entries that are not already present
pub async fn seed_faq_defaults(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut inserted = 0u64;

    for entry in DEFAULT_FAQ_ENTRIES {
        let result = sqlx::query(
            r#"
            INSERT INTO faq_entries (slug, question, answer, display_order)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(entry.slug)
        .bind(entry.question)
        .bind(entry.answer)
        .bind(entry.display_order)
        .execute(pool)
        .await?;

        inserted += result.rows_affected();
    }

    if inserted > 0 {
        tracing::info!(inserted, "Seeded default FAQ entries");
    }

    Ok(())
}
