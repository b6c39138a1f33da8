//! Order form submission.
//!
//! Validates an [`OrderForm`] against the product [`Catalog`], resolves the
//! product name, and appends a pending [`OrderRequest`] to the `orders`
//! collection. Unlike analytics writes, failures here are returned to the
//! caller: a customer must know whether their order went through.

use std::fmt;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{OrderRequest, ORDER_STATUS_PENDING};
use crate::store::{insert_entity, Record, RecordStore};

/// Product value for made-to-order requests outside the catalog.
pub const CUSTOM_PRODUCT_ID: &str = "custom";
pub const CUSTOM_PRODUCT_NAME: &str = "Custom Order";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Price in whole currency units.
    #[serde(default)]
    pub price: u32,
}

/// Products that can be ordered by ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    pub fn find(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }
}

/// Fields submitted by the storefront order form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderForm {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    /// A catalog product ID or `"custom"`.
    pub product: String,
    #[serde(default)]
    pub custom_description: String,
    #[serde(default)]
    pub course_details: String,
}

impl OrderForm {
    /// Validate the form and build a pending order created at `now`.
    pub fn into_order(self, catalog: &Catalog, now: DateTime<Utc>) -> Result<OrderRequest> {
        let name = self.name.trim();
        if name.is_empty() {
            bail!("name must not be empty");
        }

        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => bail!("invalid email address: '{}'", email),
        }

        let product = self.product.trim();
        let product_name = if product == CUSTOM_PRODUCT_ID {
            if self.custom_description.trim().is_empty() {
                bail!("custom_description must not be empty for custom orders");
            }
            CUSTOM_PRODUCT_NAME.to_string()
        } else if product.is_empty() {
            bail!("product must not be empty");
        } else {
            match catalog.find(product) {
                Some(p) => p.name.clone(),
                None => bail!("product not found: '{}'", product),
            }
        };

        Ok(OrderRequest {
            customer_name: name.to_string(),
            email: email.to_string(),
            phone: self.phone.trim().to_string(),
            product_id: product.to_string(),
            product_name,
            custom_description: self.custom_description.trim().to_string(),
            course_details: self.course_details.trim().to_string(),
            status: ORDER_STATUS_PENDING.to_string(),
            created_at: now,
        })
    }
}

/// Why [`submit_order`] did not store an order.
#[derive(Debug)]
pub enum OrderError {
    /// The submitted form was rejected; the customer can correct it.
    Invalid(anyhow::Error),
    /// The form was valid but the store failed.
    Storage(anyhow::Error),
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderError::Invalid(e) => write!(f, "{}", e),
            OrderError::Storage(e) => write!(f, "Failed to store order: {}", e),
        }
    }
}

impl std::error::Error for OrderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrderError::Invalid(e) | OrderError::Storage(e) => Some(&**e),
        }
    }
}

/// Validate and store an order, returning the stored record.
pub async fn submit_order<S>(
    store: &S,
    catalog: &Catalog,
    form: OrderForm,
) -> std::result::Result<Record, OrderError>
where
    S: RecordStore + ?Sized,
{
    let order = form
        .into_order(catalog, Utc::now())
        .map_err(OrderError::Invalid)?;
    let record = insert_entity(store, &order)
        .await
        .map_err(OrderError::Storage)?;
    info!(id = %record.id, product = %order.product_id, "order submitted");
    Ok(record)
}
