use shared::{
    domain::{coordinate_in_bounds, Marker, MAX_MESSAGE_CHARS},
    error::{ApiError, ErrorCode},
    protocol::{NewMarker, ServerEvent},
};
use storage::Storage;
use tracing::info;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn list_markers(ctx: &ApiContext) -> Result<Vec<Marker>, ApiError> {
    ctx.storage.list_markers().await.map_err(internal)
}

/// Validates and persists one marker. Returns the change-feed event so the
/// caller can broadcast it to every connected client.
pub async fn create_marker(ctx: &ApiContext, new: NewMarker) -> Result<ServerEvent, ApiError> {
    let new = validate_new_marker(new)?;

    let marker = ctx.storage.insert_marker(&new).await.map_err(internal)?;
    info!(
        marker_id = marker.id.0,
        country = %marker.country,
        "marker inserted"
    );
    Ok(ServerEvent::MarkerInserted { marker })
}

fn validate_new_marker(new: NewMarker) -> Result<NewMarker, ApiError> {
    if !coordinate_in_bounds(new.lat, new.lng) {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "coordinate is outside lat [-90,90] / lng [-180,180]",
        ));
    }

    let name = new.name.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "name cannot be empty"));
    }

    let message = new.message.trim();
    if message.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "message cannot be empty",
        ));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
        ));
    }

    let country = new.country.trim();
    if country.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "country cannot be empty",
        ));
    }

    Ok(NewMarker {
        lat: new.lat,
        lng: new.lng,
        name: name.to_string(),
        message: message.to_string(),
        country: country.to_string(),
    })
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_ctx() -> ApiContext {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        ApiContext { storage }
    }

    fn valid_marker() -> NewMarker {
        NewMarker {
            lat: 10.0,
            lng: 20.0,
            name: "Ann".to_string(),
            message: "Hi".to_string(),
            country: "Wakanda".to_string(),
        }
    }

    #[tokio::test]
    async fn create_marker_returns_insert_event() {
        let ctx = test_ctx().await;
        let event = create_marker(&ctx, valid_marker()).await.expect("create");

        let ServerEvent::MarkerInserted { marker } = event;
        assert_eq!(marker.lat, 10.0);
        assert_eq!(marker.lng, 20.0);
        assert_eq!(marker.name, "Ann");
        assert_eq!(marker.message, "Hi");
        assert_eq!(marker.country, "Wakanda");

        let listed = list_markers(&ctx).await.expect("list");
        assert_eq!(listed, vec![marker]);
    }

    #[tokio::test]
    async fn create_marker_trims_submitted_fields() {
        let ctx = test_ctx().await;
        let event = create_marker(
            &ctx,
            NewMarker {
                name: "  Ann ".to_string(),
                message: " Hi\n".to_string(),
                ..valid_marker()
            },
        )
        .await
        .expect("create");

        let ServerEvent::MarkerInserted { marker } = event;
        assert_eq!(marker.name, "Ann");
        assert_eq!(marker.message, "Hi");
    }

    #[tokio::test]
    async fn rejects_out_of_bounds_coordinate() {
        let ctx = test_ctx().await;
        let err = create_marker(
            &ctx,
            NewMarker {
                lat: 91.0,
                ..valid_marker()
            },
        )
        .await
        .expect_err("out of bounds");
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(list_markers(&ctx).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rejects_blank_name_and_message() {
        let ctx = test_ctx().await;
        for new in [
            NewMarker {
                name: "   ".to_string(),
                ..valid_marker()
            },
            NewMarker {
                message: String::new(),
                ..valid_marker()
            },
        ] {
            let err = create_marker(&ctx, new).await.expect_err("blank field");
            assert_eq!(err.code, ErrorCode::Validation);
        }
        assert!(list_markers(&ctx).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rejects_message_over_the_character_cap() {
        let ctx = test_ctx().await;
        let err = create_marker(
            &ctx,
            NewMarker {
                message: "x".repeat(MAX_MESSAGE_CHARS + 1),
                ..valid_marker()
            },
        )
        .await
        .expect_err("too long");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn rejects_blank_country() {
        let ctx = test_ctx().await;
        let err = create_marker(
            &ctx,
            NewMarker {
                country: " ".to_string(),
                ..valid_marker()
            },
        )
        .await
        .expect_err("blank country");
        assert_eq!(err.code, ErrorCode::Validation);
    }
}
