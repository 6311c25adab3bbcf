//! Conversions between domain records and Firestore field maps.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use vswap_models::{
    Exchange, ExchangeId, ExchangeStatus, Notification, NotificationKind, Plan, PlanFeatures,
    PlanTier, Rating, RatingAggregate, SubscriptionRef, User, Video, VideoId, VideoReport,
};

use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{Document, FromFirestoreValue, ToFirestoreValue, Value};

type Fields = HashMap<String, Value>;

/// Typed field access over a document's field map.
struct FieldReader<'a> {
    fields: &'a Fields,
    context: &'a str,
}

impl<'a> FieldReader<'a> {
    fn of(doc: &'a Document, context: &'a str) -> FirestoreResult<Self> {
        let fields = doc.fields.as_ref().ok_or_else(|| {
            FirestoreError::InvalidResponse(format!("{} document has no fields", context))
        })?;
        Ok(Self { fields, context })
    }

    fn nested(fields: &'a Fields, context: &'a str) -> Self {
        Self { fields, context }
    }

    fn get<T: FromFirestoreValue>(&self, key: &str) -> Option<T> {
        self.fields.get(key).and_then(T::from_firestore_value)
    }

    fn required<T: FromFirestoreValue>(&self, key: &str) -> FirestoreResult<T> {
        self.get(key).ok_or_else(|| {
            FirestoreError::InvalidResponse(format!("{} is missing field '{}'", self.context, key))
        })
    }

    fn string_or_default(&self, key: &str) -> String {
        self.get(key).unwrap_or_default()
    }

    fn time_or_now(&self, key: &str) -> DateTime<Utc> {
        self.get(key).unwrap_or_else(Utc::now)
    }

    fn map(&self, key: &str) -> Option<&'a Fields> {
        self.fields.get(key).and_then(Value::as_map)
    }
}

fn aggregate_to_value(agg: &RatingAggregate) -> Value {
    let mut fields = HashMap::new();
    fields.insert("sum".to_string(), agg.sum.to_firestore_value());
    fields.insert("count".to_string(), agg.count.to_firestore_value());
    Value::map(fields)
}

fn aggregate_from(reader: &FieldReader<'_>) -> RatingAggregate {
    match reader.map("rating") {
        Some(fields) => {
            let inner = FieldReader::nested(fields, "rating");
            RatingAggregate {
                sum: inner.get("sum").unwrap_or(0.0),
                count: inner.get("count").unwrap_or(0),
            }
        }
        None => RatingAggregate::default(),
    }
}

fn ids_to_value<'a>(ids: impl Iterator<Item = &'a str>) -> Value {
    ids.map(String::from).collect::<Vec<String>>().to_firestore_value()
}

// =============================================================================
// Users
// =============================================================================

pub fn user_to_fields(user: &User) -> Fields {
    let mut subscription = HashMap::new();
    subscription.insert("plan".to_string(), user.subscription.plan.as_str().to_firestore_value());
    subscription.insert(
        "subscription_id".to_string(),
        user.subscription.subscription_id.to_firestore_value(),
    );

    let mut fields = HashMap::new();
    fields.insert("uid".to_string(), user.uid.to_firestore_value());
    fields.insert("email".to_string(), user.email.to_firestore_value());
    fields.insert("videos".to_string(), ids_to_value(user.videos.iter().map(VideoId::as_str)));
    fields.insert("exchanges".to_string(), ids_to_value(user.exchanges.iter().map(ExchangeId::as_str)));
    fields.insert("subscription".to_string(), Value::map(subscription));
    fields.insert("rating".to_string(), aggregate_to_value(&user.rating));
    fields.insert("role".to_string(), user.role.to_firestore_value());
    fields.insert("created_at".to_string(), user.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), user.updated_at.to_firestore_value());
    fields
}

pub fn document_to_user(doc: &Document) -> FirestoreResult<User> {
    let r = FieldReader::of(doc, "user")?;
    let uid = r
        .get::<String>("uid")
        .or_else(|| doc.id().map(String::from))
        .ok_or_else(|| FirestoreError::InvalidResponse("user document has no uid".to_string()))?;

    let subscription = match r.map("subscription") {
        Some(fields) => {
            let s = FieldReader::nested(fields, "subscription");
            SubscriptionRef {
                plan: PlanTier::parse(&s.string_or_default("plan")).unwrap_or_default(),
                subscription_id: s.get("subscription_id"),
            }
        }
        None => SubscriptionRef::basic(),
    };

    Ok(User {
        uid,
        email: r.get("email"),
        videos: r
            .get::<Vec<String>>("videos")
            .unwrap_or_default()
            .into_iter()
            .map(VideoId::from)
            .collect(),
        exchanges: r
            .get::<Vec<String>>("exchanges")
            .unwrap_or_default()
            .into_iter()
            .map(ExchangeId::from_string)
            .collect(),
        subscription,
        rating: aggregate_from(&r),
        role: r.get("role"),
        created_at: r.time_or_now("created_at"),
        updated_at: r.time_or_now("updated_at"),
    })
}

// =============================================================================
// Videos
// =============================================================================

pub fn video_to_fields(video: &Video) -> Fields {
    let mut fields = HashMap::new();
    fields.insert("id".to_string(), video.id.as_str().to_firestore_value());
    fields.insert("title".to_string(), video.title.to_firestore_value());
    fields.insert("size".to_string(), video.size.to_firestore_value());
    fields.insert("hash".to_string(), video.hash.to_firestore_value());
    fields.insert("category".to_string(), video.category.to_firestore_value());
    fields.insert("keywords".to_string(), video.keywords.to_firestore_value());
    fields.insert(
        "is_sensitive_content".to_string(),
        video.is_sensitive_content.to_firestore_value(),
    );
    fields.insert("users".to_string(), video.users.to_firestore_value());
    fields.insert("owner".to_string(), video.owner.to_firestore_value());
    fields.insert("rating".to_string(), aggregate_to_value(&video.rating));
    fields.insert("uploaded_at".to_string(), video.uploaded_at.to_firestore_value());
    fields
}

pub fn document_to_video(doc: &Document) -> FirestoreResult<Video> {
    let r = FieldReader::of(doc, "video")?;
    let users: Vec<String> = r.get("users").unwrap_or_default();
    let owner = r
        .get::<String>("owner")
        .or_else(|| users.last().cloned())
        .ok_or_else(|| FirestoreError::InvalidResponse("video has no owner".to_string()))?;

    Ok(Video {
        id: VideoId::from(r.required::<String>("id")?),
        title: r.string_or_default("title"),
        size: r.get("size").unwrap_or(0),
        hash: r.string_or_default("hash"),
        category: r.get("category"),
        keywords: r.get("keywords").unwrap_or_default(),
        is_sensitive_content: r.get("is_sensitive_content").unwrap_or(false),
        users,
        owner,
        rating: aggregate_from(&r),
        uploaded_at: r.time_or_now("uploaded_at"),
    })
}

// =============================================================================
// Exchanges
// =============================================================================

pub fn exchange_to_fields(exchange: &Exchange) -> Fields {
    let mut fields = HashMap::new();
    fields.insert("id".to_string(), exchange.id.as_str().to_firestore_value());
    fields.insert("initiator".to_string(), exchange.initiator.to_firestore_value());
    fields.insert("responder".to_string(), exchange.responder.to_firestore_value());
    fields.insert(
        "responder_video".to_string(),
        exchange.responder_video.as_str().to_firestore_value(),
    );
    fields.insert(
        "initiator_video".to_string(),
        exchange
            .initiator_video
            .as_ref()
            .map(|v| v.as_str())
            .to_firestore_value(),
    );
    fields.insert("status".to_string(), exchange.status.as_str().to_firestore_value());
    fields.insert(
        "requested_date".to_string(),
        exchange.requested_date.to_firestore_value(),
    );
    fields.insert(
        "responded_date".to_string(),
        exchange.responded_date.to_firestore_value(),
    );
    fields
}

pub fn document_to_exchange(doc: &Document) -> FirestoreResult<Exchange> {
    let r = FieldReader::of(doc, "exchange")?;
    let status_raw: String = r.required("status")?;
    let status = ExchangeStatus::parse(&status_raw).ok_or_else(|| {
        FirestoreError::InvalidResponse(format!("unknown exchange status '{}'", status_raw))
    })?;

    Ok(Exchange {
        id: ExchangeId::from_string(r.required::<String>("id")?),
        initiator: r.required("initiator")?,
        responder: r.required("responder")?,
        responder_video: VideoId::from(r.required::<String>("responder_video")?),
        initiator_video: r.get::<String>("initiator_video").map(VideoId::from),
        status,
        requested_date: r.required("requested_date")?,
        responded_date: r.get("responded_date"),
    })
}

// =============================================================================
// Ratings
// =============================================================================

pub fn rating_to_fields(rating: &Rating) -> Fields {
    let mut fields = HashMap::new();
    fields.insert(
        "exchange_id".to_string(),
        rating.exchange_id.as_str().to_firestore_value(),
    );
    fields.insert("rating_user".to_string(), rating.rating_user.to_firestore_value());
    fields.insert("rated_user".to_string(), rating.rated_user.to_firestore_value());
    fields.insert("video".to_string(), rating.video.as_str().to_firestore_value());
    fields.insert(
        "video_uploader".to_string(),
        rating.video_uploader.to_firestore_value(),
    );
    fields.insert("rating".to_string(), u32::from(rating.rating).to_firestore_value());
    fields.insert("comment".to_string(), rating.comment.to_firestore_value());
    fields.insert("created_at".to_string(), rating.created_at.to_firestore_value());
    fields
}

pub fn document_to_rating(doc: &Document) -> FirestoreResult<Rating> {
    let r = FieldReader::of(doc, "rating")?;
    let value: u32 = r.required("rating")?;

    Ok(Rating {
        exchange_id: ExchangeId::from_string(r.required::<String>("exchange_id")?),
        rating_user: r.required("rating_user")?,
        rated_user: r.required("rated_user")?,
        video: VideoId::from(r.required::<String>("video")?),
        video_uploader: r.string_or_default("video_uploader"),
        rating: u8::try_from(value).map_err(|_| {
            FirestoreError::InvalidResponse(format!("rating value {} out of range", value))
        })?,
        comment: r.get("comment"),
        created_at: r.time_or_now("created_at"),
    })
}

// =============================================================================
// Plans
// =============================================================================

pub fn plan_to_fields(plan: &Plan) -> Fields {
    let mut features = HashMap::new();
    features.insert("stats".to_string(), plan.features.stats.to_firestore_value());
    features.insert(
        "exchange_priority".to_string(),
        plan.features.exchange_priority.to_firestore_value(),
    );
    features.insert(
        "search_priority".to_string(),
        plan.features.search_priority.to_firestore_value(),
    );
    features.insert(
        "support_priority".to_string(),
        plan.features.support_priority.to_firestore_value(),
    );

    let mut fields = HashMap::new();
    fields.insert("name".to_string(), plan.name.as_str().to_firestore_value());
    fields.insert(
        "monthly_price_cents".to_string(),
        plan.monthly_price_cents.to_firestore_value(),
    );
    fields.insert("library_storage".to_string(), plan.library_storage.to_firestore_value());
    fields.insert("library_size".to_string(), plan.library_size.to_firestore_value());
    fields.insert("video_max_size".to_string(), plan.video_max_size.to_firestore_value());
    fields.insert("exchange_limit".to_string(), plan.exchange_limit.to_firestore_value());
    fields.insert("features".to_string(), Value::map(features));
    fields
}

pub fn document_to_plan(doc: &Document) -> FirestoreResult<Plan> {
    let r = FieldReader::of(doc, "plan")?;
    let name_raw: String = r.required("name")?;
    let name = PlanTier::parse(&name_raw)
        .ok_or_else(|| FirestoreError::InvalidResponse(format!("unknown plan '{}'", name_raw)))?;

    let features = r
        .map("features")
        .map(|fields| {
            let f = FieldReader::nested(fields, "features");
            PlanFeatures {
                stats: f.get("stats").unwrap_or(false),
                exchange_priority: f.get("exchange_priority").unwrap_or(false),
                search_priority: f.get("search_priority").unwrap_or(false),
                support_priority: f.get("support_priority").unwrap_or(false),
            }
        })
        .unwrap_or_default();

    Ok(Plan {
        name,
        monthly_price_cents: r.get("monthly_price_cents").unwrap_or(0),
        library_storage: r.required("library_storage")?,
        library_size: r.required("library_size")?,
        video_max_size: r.required("video_max_size")?,
        exchange_limit: r.get("exchange_limit").unwrap_or(0),
        features,
    })
}

// =============================================================================
// Notifications, reports, locks
// =============================================================================

pub fn notification_to_fields(n: &Notification) -> Fields {
    let mut fields = HashMap::new();
    fields.insert("id".to_string(), n.id.to_firestore_value());
    fields.insert("user".to_string(), n.user.to_firestore_value());
    fields.insert("kind".to_string(), n.kind.as_str().to_firestore_value());
    fields.insert("message".to_string(), n.message.to_firestore_value());
    fields.insert(
        "exchange".to_string(),
        n.exchange.as_ref().map(|e| e.as_str()).to_firestore_value(),
    );
    fields.insert(
        "video".to_string(),
        n.video.as_ref().map(|v| v.as_str()).to_firestore_value(),
    );
    fields.insert("read".to_string(), n.read.to_firestore_value());
    fields.insert("created_at".to_string(), n.created_at.to_firestore_value());
    fields
}

pub fn document_to_notification(doc: &Document) -> FirestoreResult<Notification> {
    let r = FieldReader::of(doc, "notification")?;
    let kind_raw: String = r.required("kind")?;
    let kind = NotificationKind::parse(&kind_raw).ok_or_else(|| {
        FirestoreError::InvalidResponse(format!("unknown notification kind '{}'", kind_raw))
    })?;

    Ok(Notification {
        id: r.required("id")?,
        user: r.required("user")?,
        kind,
        message: r.get("message").unwrap_or_else(|| kind.message().to_string()),
        exchange: r.get::<String>("exchange").map(ExchangeId::from_string),
        video: r.get::<String>("video").map(VideoId::from),
        read: r.get("read").unwrap_or(false),
        created_at: r.time_or_now("created_at"),
    })
}

pub fn report_to_fields(report: &VideoReport) -> Fields {
    let mut fields = HashMap::new();
    fields.insert("id".to_string(), report.id.to_firestore_value());
    fields.insert("video".to_string(), report.video.as_str().to_firestore_value());
    fields.insert("reporter".to_string(), report.reporter.to_firestore_value());
    fields.insert("reason".to_string(), report.reason.to_firestore_value());
    fields.insert("created_at".to_string(), report.created_at.to_firestore_value());
    fields
}

pub fn lock_to_fields(holder: &str, at: DateTime<Utc>) -> Fields {
    let mut fields = HashMap::new();
    fields.insert("holder".to_string(), holder.to_firestore_value());
    fields.insert("created_at".to_string(), at.to_firestore_value());
    fields
}

pub fn document_to_lock_holder(doc: &Document) -> FirestoreResult<String> {
    FieldReader::of(doc, "lock")?.required("holder")
}
