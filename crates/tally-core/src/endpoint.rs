//! Closed registry of provider endpoints.
//!
//! Every resource the engine can extract is a variant of [`Endpoint`]. The
//! registry row ([`EndpointSpec`]) carries the request path, the JSON key that
//! holds the item array, the primary key fields, whether the endpoint honours a
//! modified-since filter, and how it paginates. Configuration strings are
//! validated against this table once at startup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// How an endpoint continues past its first response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// One request returns everything.
    Single,
    /// `page=1,2,...` until an empty page (or the reported page count).
    Page,
    /// `offset=N` where the next offset is read from `cursor_field` of the last
    /// item, or advanced by the item count when the field is absent.
    Offset { cursor_field: &'static str },
}

// ---------------------------------------------------------------------------
// EndpointSpec
// ---------------------------------------------------------------------------

/// Static registry row for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Configuration and output table name.
    pub name: &'static str,
    /// Path relative to the provider API base URL.
    pub path: &'static str,
    /// Key of the item array in the response body.
    pub response_key: &'static str,
    /// Fields identifying a row within one tenant.
    pub primary_key: &'static [&'static str],
    /// Whether `If-Modified-Since` narrows the result set.
    pub supports_modified_since: bool,
    pub pagination: Pagination,
}

const fn spec(
    name: &'static str,
    primary_key: &'static [&'static str],
    supports_modified_since: bool,
    pagination: Pagination,
) -> EndpointSpec {
    EndpointSpec {
        name,
        path: name,
        response_key: name,
        primary_key,
        supports_modified_since,
        pagination,
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Provider resource types available for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Endpoint {
    Accounts,
    BankTransactions,
    BankTransfers,
    BatchPayments,
    BrandingThemes,
    ContactGroups,
    Contacts,
    CreditNotes,
    Currencies,
    Employees,
    Invoices,
    Items,
    Journals,
    LinkedTransactions,
    ManualJournals,
    Organisations,
    Overpayments,
    Payments,
    Prepayments,
    PurchaseOrders,
    Quotes,
    Receipts,
    RepeatingInvoices,
    TaxRates,
    TrackingCategories,
    Users,
}

impl Endpoint {
    /// Every registered endpoint, in registry order.
    pub const ALL: [Self; 26] = [
        Self::Accounts,
        Self::BankTransactions,
        Self::BankTransfers,
        Self::BatchPayments,
        Self::BrandingThemes,
        Self::ContactGroups,
        Self::Contacts,
        Self::CreditNotes,
        Self::Currencies,
        Self::Employees,
        Self::Invoices,
        Self::Items,
        Self::Journals,
        Self::LinkedTransactions,
        Self::ManualJournals,
        Self::Organisations,
        Self::Overpayments,
        Self::Payments,
        Self::Prepayments,
        Self::PurchaseOrders,
        Self::Quotes,
        Self::Receipts,
        Self::RepeatingInvoices,
        Self::TaxRates,
        Self::TrackingCategories,
        Self::Users,
    ];

    /// Registry row for this endpoint.
    #[must_use]
    pub const fn spec(self) -> EndpointSpec {
        use Pagination::{Offset, Page, Single};
        match self {
            Self::Accounts => spec("Accounts", &["AccountID"], true, Single),
            Self::BankTransactions => spec("BankTransactions", &["BankTransactionID"], true, Page),
            Self::BankTransfers => spec("BankTransfers", &["BankTransferID"], true, Single),
            Self::BatchPayments => spec("BatchPayments", &["BatchPaymentID"], true, Single),
            Self::BrandingThemes => spec("BrandingThemes", &["BrandingThemeID"], false, Single),
            Self::ContactGroups => spec("ContactGroups", &["ContactGroupID"], false, Single),
            Self::Contacts => spec("Contacts", &["ContactID"], true, Page),
            Self::CreditNotes => spec("CreditNotes", &["CreditNoteID"], true, Page),
            Self::Currencies => spec("Currencies", &["Code"], false, Single),
            Self::Employees => spec("Employees", &["EmployeeID"], true, Single),
            Self::Invoices => spec("Invoices", &["InvoiceID"], true, Page),
            Self::Items => spec("Items", &["ItemID"], true, Single),
            Self::Journals => spec(
                "Journals",
                &["JournalID"],
                true,
                Offset {
                    cursor_field: "JournalNumber",
                },
            ),
            Self::LinkedTransactions => {
                spec("LinkedTransactions", &["LinkedTransactionID"], false, Page)
            }
            Self::ManualJournals => spec("ManualJournals", &["ManualJournalID"], true, Page),
            Self::Organisations => EndpointSpec {
                name: "Organisations",
                path: "Organisation",
                response_key: "Organisations",
                primary_key: &["OrganisationID"],
                supports_modified_since: false,
                pagination: Single,
            },
            Self::Overpayments => spec("Overpayments", &["OverpaymentID"], true, Page),
            Self::Payments => spec("Payments", &["PaymentID"], true, Page),
            Self::Prepayments => spec("Prepayments", &["PrepaymentID"], true, Page),
            Self::PurchaseOrders => spec("PurchaseOrders", &["PurchaseOrderID"], true, Page),
            Self::Quotes => spec("Quotes", &["QuoteID"], false, Page),
            Self::Receipts => spec("Receipts", &["ReceiptID"], true, Single),
            Self::RepeatingInvoices => {
                spec("RepeatingInvoices", &["RepeatingInvoiceID"], false, Single)
            }
            Self::TaxRates => spec("TaxRates", &["TaxType"], false, Single),
            Self::TrackingCategories => {
                spec("TrackingCategories", &["TrackingCategoryID"], false, Single)
            }
            Self::Users => spec("Users", &["UserID"], true, Single),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.spec().name
    }

    /// Comma-separated list of all endpoint names, for error messages.
    #[must_use]
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse and deduplicate a configured endpoint selection.
    ///
    /// Order of first appearance is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for an empty selection and
    /// [`CoreError::UnknownEndpoint`] for any name outside the registry.
    pub fn parse_selection<S: AsRef<str>>(names: &[S]) -> Result<Vec<Self>, CoreError> {
        let mut selected = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let endpoint: Self = name.parse()?;
            if !selected.contains(&endpoint) {
                selected.push(endpoint);
            }
        }
        if selected.is_empty() {
            return Err(CoreError::Validation(
                "at least one endpoint must be selected".into(),
            ));
        }
        Ok(selected)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = CoreError;

    /// Case-insensitive; `Organisation` is accepted as an alias of `Organisations`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|e| {
                let spec = e.spec();
                spec.name.eq_ignore_ascii_case(wanted) || spec.path.eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| CoreError::UnknownEndpoint {
                name: wanted.to_string(),
                valid: Self::valid_names(),
            })
    }
}
