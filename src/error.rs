use std::fmt;

#[derive(Debug)]
pub enum ProductionError {
    MissingAsset(String),
    Decode(String),
    OrderNotFound(String),
    NoCards(String),
    Card {
        index: usize,
        source: Box<ProductionError>,
    },
    AlreadyRunning(String),
    InvalidConfiguration(String),
    Layout(String),
    Pdf(String),
    Svg(String),
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl ProductionError {
    pub fn card(index: usize, source: ProductionError) -> Self {
        ProductionError::Card {
            index,
            source: Box::new(source),
        }
    }

    /// Innermost error, skipping card wrappers.
    pub fn root_cause(&self) -> &ProductionError {
        match self {
            ProductionError::Card { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl fmt::Display for ProductionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductionError::MissingAsset(message) => write!(f, "missing asset: {}", message),
            ProductionError::Decode(message) => write!(f, "image decode failed: {}", message),
            ProductionError::OrderNotFound(order_id) => {
                write!(f, "order not found: {}", order_id)
            }
            ProductionError::NoCards(order_id) => {
                write!(f, "order {} has no cards to produce", order_id)
            }
            ProductionError::Card { index, source } => write!(f, "card {}: {}", index, source),
            ProductionError::AlreadyRunning(order_id) => {
                write!(f, "production already running for order {}", order_id)
            }
            ProductionError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            ProductionError::Layout(message) => write!(f, "layout error: {}", message),
            ProductionError::Pdf(message) => write!(f, "pdf error: {}", message),
            ProductionError::Svg(message) => write!(f, "svg error: {}", message),
            ProductionError::Json(err) => write!(f, "json error: {}", err),
            ProductionError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for ProductionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProductionError::Card { source, .. } => Some(source.as_ref()),
            ProductionError::Json(err) => Some(err),
            ProductionError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProductionError {
    fn from(value: std::io::Error) -> Self {
        ProductionError::Io(value)
    }
}

impl From<serde_json::Error> for ProductionError {
    fn from(value: serde_json::Error) -> Self {
        ProductionError::Json(value)
    }
}

impl From<image::ImageError> for ProductionError {
    fn from(value: image::ImageError) -> Self {
        ProductionError::Decode(value.to_string())
    }
}

/// Recoverable geometry conditions. Logged and carried alongside results,
/// never propagated as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryWarning {
    EmptyGeometry { layer: String },
    InvalidPolygonRepair { detail: String },
    CollapsedSpacerShape { polygon: usize },
    NestedIsland { depth: usize, promoted: bool },
}

impl fmt::Display for GeometryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryWarning::EmptyGeometry { layer } => {
                write!(f, "no contours found for {}", layer)
            }
            GeometryWarning::InvalidPolygonRepair { detail } => {
                write!(f, "dropped invalid ring after repair: {}", detail)
            }
            GeometryWarning::CollapsedSpacerShape { polygon } => {
                write!(f, "spacer inset collapsed polygon {} to empty", polygon)
            }
            GeometryWarning::NestedIsland { depth, promoted } => {
                if *promoted {
                    write!(f, "island at depth {} promoted to exterior", depth)
                } else {
                    write!(f, "island at depth {} skipped", depth)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_errors_keep_root_cause() {
        let err = ProductionError::card(2, ProductionError::MissingAsset("hero".into()));
        assert_eq!(err.to_string(), "card 2: missing asset: hero");
        assert!(matches!(err.root_cause(), ProductionError::MissingAsset(_)));
    }

    #[test]
    fn order_level_errors_read_differently() {
        let missing = ProductionError::OrderNotFound("abc".into()).to_string();
        let empty = ProductionError::NoCards("abc".into()).to_string();
        assert_ne!(missing, empty);
        assert!(empty.contains("no cards"));
    }
}
