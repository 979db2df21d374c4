use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::ShippingConfig;
use crate::errors::ServiceError;

/// Postal address as the label provider expects it.
#[derive(Debug, Clone)]
pub struct Address {
    pub name: String,
    pub street1: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Parcel dimensions in inches and ounces.
#[derive(Debug, Clone, Copy)]
pub struct Parcel {
    pub length_in: f64,
    pub width_in: f64,
    pub height_in: f64,
    pub weight_oz: f64,
}

impl Parcel {
    pub fn from_config(cfg: &ShippingConfig) -> Self {
        Self {
            length_in: cfg.parcel_length_in,
            width_in: cfg.parcel_width_in,
            height_in: cfg.parcel_height_in,
            weight_oz: cfg.parcel_weight_oz,
        }
    }
}

/// A purchasable rate offered for a shipment.
#[derive(Debug, Clone)]
pub struct ShippingRate {
    pub rate_id: String,
    pub carrier: String,
    pub service: String,
    pub amount_minor: i64,
}

/// Outcome of buying a label for a chosen rate.
#[derive(Debug, Clone)]
pub struct LabelPurchase {
    pub label_url: String,
    pub tracking_number: String,
    pub tracking_url_provider: Option<String>,
}

/// Label provider operations the lifecycle engine depends on.
#[async_trait]
pub trait LabelProvider: Send + Sync {
    /// Rates a shipment. Idempotent; implementations may retry.
    async fn create_shipment(
        &self,
        from: &Address,
        to: &Address,
        parcel: &Parcel,
    ) -> Result<Vec<ShippingRate>, ServiceError>;

    /// Purchases a label for a previously returned rate. Not idempotent.
    async fn purchase_label(&self, rate_id: &str) -> Result<LabelPurchase, ServiceError>;
}

/// Picks the cheapest rate from the preferred carrier, falling back to
/// the cheapest rate overall when that carrier offered none.
pub fn select_rate<'a>(
    rates: &'a [ShippingRate],
    preferred_carrier: &str,
) -> Option<&'a ShippingRate> {
    let preferred = rates
        .iter()
        .filter(|r| r.carrier.eq_ignore_ascii_case(preferred_carrier))
        .min_by_key(|r| r.amount_minor);

    preferred.or_else(|| rates.iter().min_by_key(|r| r.amount_minor))
}

/// Public tracking page for carriers whose rates we purchase, used when
/// the provider response omits a tracking URL.
pub fn tracking_url_for(carrier: &str, tracking_number: &str) -> Option<String> {
    match carrier.to_ascii_lowercase().as_str() {
        "usps" => Some(format!(
            "https://tools.usps.com/go/TrackConfirmAction?tLabels={}",
            tracking_number
        )),
        "ups" => Some(format!(
            "https://www.ups.com/track?tracknum={}",
            tracking_number
        )),
        "fedex" => Some(format!(
            "https://www.fedex.com/fedextrack/?trknbr={}",
            tracking_number
        )),
        "dhl" | "dhl_express" => Some(format!(
            "https://www.dhl.com/us-en/home/tracking.html?tracking-id={}",
            tracking_number
        )),
        _ => None,
    }
}

/// Parses a provider decimal money string ("12.34") into minor units.
pub fn parse_money_minor(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (dollars_part, cents_part) = match digits.split_once('.') {
        Some((d, c)) => (d, c),
        None => (digits, ""),
    };

    let dollars: i64 = if dollars_part.is_empty() {
        0
    } else {
        dollars_part.parse().ok()?
    };

    let cents: i64 = match cents_part.len() {
        0 => 0,
        1 => cents_part.parse::<i64>().ok()? * 10,
        _ => cents_part[..2].parse().ok()?,
    };

    let minor = dollars.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -minor } else { minor })
}

/// Shippo-backed label provider.
#[derive(Clone)]
pub struct ShippoClient {
    http: reqwest::Client,
    api_base: String,
    api_token: String,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct ShippoShipmentResponse {
    #[serde(default)]
    rates: Vec<ShippoRate>,
}

#[derive(Debug, Deserialize)]
struct ShippoRate {
    object_id: String,
    amount: String,
    provider: String,
    #[serde(default)]
    servicelevel: ShippoServiceLevel,
}

#[derive(Debug, Default, Deserialize)]
struct ShippoServiceLevel {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShippoTransactionResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    label_url: Option<String>,
    #[serde(default)]
    tracking_number: Option<String>,
    #[serde(default)]
    tracking_url_provider: Option<String>,
    #[serde(default)]
    messages: Vec<ShippoMessage>,
}

#[derive(Debug, Deserialize)]
struct ShippoMessage {
    #[serde(default)]
    text: String,
}

impl ShippoClient {
    pub fn new(cfg: &ShippingConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build shipping http client: {}", e))
            })?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_token: cfg.api_token.clone(),
            max_retries: 3,
        })
    }

    fn address_json(address: &Address) -> serde_json::Value {
        json!({
            "name": address.name,
            "street1": address.street1,
            "city": address.city,
            "state": address.state,
            "zip": address.zip,
            "country": address.country,
            "email": address.email,
            "phone": address.phone,
        })
    }

    fn convert_rates(response: ShippoShipmentResponse) -> Vec<ShippingRate> {
        response
            .rates
            .into_iter()
            .filter_map(|rate| {
                let amount_minor = parse_money_minor(&rate.amount)?;
                Some(ShippingRate {
                    rate_id: rate.object_id,
                    carrier: rate.provider,
                    service: rate.servicelevel.name.unwrap_or_default(),
                    amount_minor,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LabelProvider for ShippoClient {
    async fn create_shipment(
        &self,
        from: &Address,
        to: &Address,
        parcel: &Parcel,
    ) -> Result<Vec<ShippingRate>, ServiceError> {
        let body = json!({
            "address_from": Self::address_json(from),
            "address_to": Self::address_json(to),
            "parcels": [{
                "length": format!("{}", parcel.length_in),
                "width": format!("{}", parcel.width_in),
                "height": format!("{}", parcel.height_in),
                "distance_unit": "in",
                "weight": format!("{}", parcel.weight_oz),
                "mass_unit": "oz",
            }],
            "async": false,
        });

        // Rating creates no transaction on the provider side, so a bounded
        // retry with exponential backoff is safe.
        for attempt in 1..=self.max_retries {
            let result = self
                .http
                .post(format!("{}/shipments", self.api_base))
                .header("Authorization", format!("ShippoToken {}", self.api_token))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: ShippoShipmentResponse = response.json().await.map_err(|e| {
                        warn!("Label provider returned unparseable shipment: {}", e);
                        ServiceError::ExternalServiceError(
                            "label provider returned an invalid response".to_string(),
                        )
                    })?;
                    let rates = Self::convert_rates(parsed);
                    info!(rate_count = rates.len(), "Shipment rated");
                    return Ok(rates);
                }
                Ok(response) => {
                    warn!(
                        "Shipment rating failed with status: {} (attempt {}/{})",
                        response.status(),
                        attempt,
                        self.max_retries
                    );
                }
                Err(e) => {
                    warn!(
                        "Shipment rating error: {} (attempt {}/{})",
                        e, attempt, self.max_retries
                    );
                }
            }

            if attempt < self.max_retries {
                let backoff = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        error!(
            "Shipment rating failed after {} attempts",
            self.max_retries
        );
        Err(ServiceError::ExternalServiceError(
            "label provider could not rate the shipment".to_string(),
        ))
    }

    async fn purchase_label(&self, rate_id: &str) -> Result<LabelPurchase, ServiceError> {
        let body = json!({
            "rate": rate_id,
            "label_file_type": "PDF",
            "async": false,
        });

        let response = self
            .http
            .post(format!("{}/transactions", self.api_base))
            .header("Authorization", format!("ShippoToken {}", self.api_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("Label purchase request error: {}", e);
                ServiceError::ExternalServiceError("label provider unreachable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            error!(
                status = status.as_u16(),
                body = %body_text,
                "Label purchase rejected"
            );
            return Err(ServiceError::ExternalServiceError(
                "label provider rejected the purchase".to_string(),
            ));
        }

        let parsed: ShippoTransactionResponse = response.json().await.map_err(|e| {
            warn!("Label provider returned unparseable transaction: {}", e);
            ServiceError::ExternalServiceError(
                "label provider returned an invalid response".to_string(),
            )
        })?;

        if !parsed.status.eq_ignore_ascii_case("SUCCESS") {
            let detail: Vec<String> = parsed.messages.into_iter().map(|m| m.text).collect();
            error!(
                status = %parsed.status,
                messages = ?detail,
                "Label purchase did not succeed"
            );
            return Err(ServiceError::ExternalServiceError(
                "label purchase did not succeed".to_string(),
            ));
        }

        match (parsed.label_url, parsed.tracking_number) {
            (Some(label_url), Some(tracking_number)) => {
                info!(%tracking_number, "Label purchased");
                Ok(LabelPurchase {
                    label_url,
                    tracking_number,
                    tracking_url_provider: parsed.tracking_url_provider,
                })
            }
            _ => Err(ServiceError::ExternalServiceError(
                "label provider response missing label or tracking number".to_string(),
            )),
        }
    }
}
