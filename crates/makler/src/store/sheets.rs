//! Google-Sheets-backed store. Thin wrapper around the generated
//! google-sheets4 client allowing the synchronous [`RecordStore`] callers to
//! reach the spreadsheet without exposing async details; the wrapper owns its
//! runtime, so construct it (and call it) off any other runtime's worker
//! threads.
//!
//! Collections map to three worksheets (`Realtors`, `Requests`,
//! `Transactions`), created with header rows on first connect. Column
//! positions matter only inside this module; everything crossing the trait
//! boundary is a named-field struct.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use google_sheets4::api::{
    AddSheetRequest, BatchUpdateSpreadsheetRequest, Request, Scope, SheetProperties, ValueRange,
};
use google_sheets4::{hyper_rustls, hyper_util, yup_oauth2, Sheets};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

use crate::config::SheetsCredential;

use super::{
    Agent, AgentId, CollectionCounts, DealType, Lead, LeadDetails, LeadId, LeadStatus, Purchase,
    PurchaseId, RecordStore, StoreError, StoreMode,
};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

const REALTORS: &str = "Realtors";
const REQUESTS: &str = "Requests";
const TRANSACTIONS: &str = "Transactions";

const REALTOR_HEADERS: [&str; 7] = [
    "telegram_id",
    "full_name",
    "region",
    "type",
    "phone",
    "balance",
    "registered_at",
];
const REQUEST_HEADERS: [&str; 8] = [
    "id",
    "type",
    "region",
    "rooms",
    "price",
    "phone",
    "status",
    "created_at",
];
const TRANSACTION_HEADERS: [&str; 5] = ["id", "realtor_id", "request_id", "amount", "date"];

type Connector = hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;

pub struct GoogleSheetsStore {
    hub: Sheets<Connector>,
    runtime: Runtime,
    spreadsheet_id: String,
}

impl std::fmt::Debug for GoogleSheetsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSheetsStore")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .finish_non_exhaustive()
    }
}

impl GoogleSheetsStore {
    /// Authorize against the Sheets API and make sure the three worksheets
    /// exist. Any failure here is a connection-time error the caller can act
    /// on (typically by degrading to the local file store).
    pub fn connect(sheet_url: &str, credential: &SheetsCredential) -> Result<Self, StoreError> {
        let spreadsheet_id = spreadsheet_id_from_url(sheet_url)
            .ok_or_else(|| StoreError::Malformed(format!("unrecognized sheet URL: {sheet_url}")))?;
        let runtime = Runtime::new().map_err(|err| StoreError::Unavailable(err.to_string()))?;

        let credential = credential.clone();
        let hub = runtime.block_on(async move {
            let key = match credential {
                SheetsCredential::Inline(raw) => yup_oauth2::parse_service_account_key(raw)
                    .map_err(|err| StoreError::Malformed(err.to_string()))?,
                SheetsCredential::KeyFile(path) => yup_oauth2::read_service_account_key(&path)
                    .await
                    .map_err(|err| StoreError::Unavailable(err.to_string()))?,
            };
            let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
                .build()
                .await
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;

            let connector = hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|err| StoreError::Unavailable(err.to_string()))?
                .https_or_http()
                .enable_http1()
                .build();
            let client = hyper_util::client::legacy::Client::builder(
                hyper_util::rt::TokioExecutor::new(),
            )
            .build(connector);

            Ok::<_, StoreError>(Sheets::new(client, auth))
        })?;

        let store = Self {
            hub,
            runtime,
            spreadsheet_id,
        };
        store.ensure_worksheets()?;
        Ok(store)
    }

    /// Run an API call on the owned runtime with a bounded timeout; a timeout
    /// is a transient failure, never a success.
    fn call<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = google_sheets4::common::Result<T>>,
    {
        self.runtime.block_on(async {
            match tokio::time::timeout(CALL_TIMEOUT, fut).await {
                Ok(result) => result.map_err(|err| StoreError::Unavailable(err.to_string())),
                Err(_) => Err(StoreError::Unavailable("sheets call timed out".to_string())),
            }
        })
    }

    fn ensure_worksheets(&self) -> Result<(), StoreError> {
        let (_, spreadsheet) = self.call(self.hub.spreadsheets().get(&self.spreadsheet_id).doit())?;
        let existing: Vec<String> = spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|sheet| sheet.properties.and_then(|props| props.title))
            .collect();

        for (title, headers) in [
            (REALTORS, REALTOR_HEADERS.as_slice()),
            (REQUESTS, REQUEST_HEADERS.as_slice()),
            (TRANSACTIONS, TRANSACTION_HEADERS.as_slice()),
        ] {
            if existing.iter().any(|name| name == title) {
                continue;
            }
            let request = BatchUpdateSpreadsheetRequest {
                requests: Some(vec![Request {
                    add_sheet: Some(AddSheetRequest {
                        properties: Some(SheetProperties {
                            title: Some(title.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            };
            self.call(
                self.hub
                    .spreadsheets()
                    .batch_update(request, &self.spreadsheet_id)
                    .doit(),
            )?;
            let header_row = headers.iter().map(|h| json!(h)).collect();
            self.append_row(title, header_row)?;
            tracing::info!(worksheet = title, "created missing worksheet");
        }
        Ok(())
    }

    fn rows(&self, worksheet: &str, columns: &str) -> Result<Vec<Vec<Value>>, StoreError> {
        let range = format!("{worksheet}!A2:{columns}");
        let (_, values) = self.call(
            self.hub
                .spreadsheets()
                .values_get(&self.spreadsheet_id, &range)
                .add_scope(Scope::Spreadsheet)
                .doit(),
        )?;
        Ok(values.values.unwrap_or_default())
    }

    fn append_row(&self, worksheet: &str, row: Vec<Value>) -> Result<(), StoreError> {
        let payload = ValueRange {
            values: Some(vec![row]),
            ..Default::default()
        };
        self.call(
            self.hub
                .spreadsheets()
                .values_append(payload, &self.spreadsheet_id, &format!("{worksheet}!A1"))
                .value_input_option("RAW")
                .add_scope(Scope::Spreadsheet)
                .doit(),
        )?;
        Ok(())
    }

    fn update_cell(&self, worksheet: &str, cell: &str, value: Value) -> Result<(), StoreError> {
        let payload = ValueRange {
            values: Some(vec![vec![value]]),
            ..Default::default()
        };
        self.call(
            self.hub
                .spreadsheets()
                .values_update(payload, &self.spreadsheet_id, &format!("{worksheet}!{cell}"))
                .value_input_option("RAW")
                .add_scope(Scope::Spreadsheet)
                .doit(),
        )?;
        Ok(())
    }

    /// Locate a record row by its key in column A. Returns the 1-based sheet
    /// row together with the decoded cells. First-match linear scan.
    fn find_row(
        &self,
        worksheet: &str,
        columns: &str,
        key: &str,
    ) -> Result<Option<(usize, Vec<Value>)>, StoreError> {
        let rows = self.rows(worksheet, columns)?;
        for (idx, row) in rows.into_iter().enumerate() {
            if cell_str(&row, 0) == key {
                return Ok(Some((idx + 2, row)));
            }
        }
        Ok(None)
    }
}

impl RecordStore for GoogleSheetsStore {
    fn insert_agent(&self, agent: Agent) -> Result<(), StoreError> {
        if self.find_row(REALTORS, "G", &agent.id.to_string())?.is_some() {
            return Err(StoreError::Duplicate);
        }
        self.append_row(
            REALTORS,
            vec![
                json!(agent.id.to_string()),
                json!(agent.display_name),
                json!(agent.region),
                json!(agent.deal_type.label()),
                json!(agent.phone),
                json!(agent.balance.to_string()),
                json!(agent.registered_at.to_rfc3339()),
            ],
        )
    }

    fn agent(&self, id: AgentId) -> Result<Option<Agent>, StoreError> {
        match self.find_row(REALTORS, "G", &id.to_string())? {
            Some((_, row)) => decode_agent(&row).map(Some),
            None => Ok(None),
        }
    }

    fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.rows(REALTORS, "G")?
            .iter()
            .filter(|row| !cell_str(row, 0).is_empty())
            .map(|row| decode_agent(row))
            .collect()
    }

    fn update_agent_balance(&self, id: AgentId, balance: u64) -> Result<(), StoreError> {
        let (row, _) = self
            .find_row(REALTORS, "G", &id.to_string())?
            .ok_or(StoreError::NotFound)?;
        self.update_cell(REALTORS, &format!("F{row}"), json!(balance.to_string()))
    }

    fn insert_lead(&self, lead: Lead) -> Result<(), StoreError> {
        if self.find_row(REQUESTS, "H", &lead.id.0)?.is_some() {
            return Err(StoreError::Duplicate);
        }
        self.append_row(
            REQUESTS,
            vec![
                json!(lead.id.0),
                json!(lead.deal_type.label()),
                json!(lead.region),
                json!(lead.rooms),
                json!(lead.price_range),
                json!(lead.client_phone),
                json!(lead.status.label()),
                json!(lead.created_at.to_rfc3339()),
            ],
        )
    }

    fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        match self.find_row(REQUESTS, "H", &id.0)? {
            Some((_, row)) => decode_lead(&row).map(Some),
            None => Ok(None),
        }
    }

    fn pending_leads(&self) -> Result<Vec<Lead>, StoreError> {
        let leads: Result<Vec<Lead>, StoreError> = self
            .rows(REQUESTS, "H")?
            .iter()
            .filter(|row| !cell_str(row, 0).is_empty())
            .map(|row| decode_lead(row))
            .collect();
        Ok(leads?
            .into_iter()
            .filter(|lead| lead.status == LeadStatus::New)
            .collect())
    }

    fn update_lead_status(&self, id: &LeadId, status: LeadStatus) -> Result<(), StoreError> {
        let (row, _) = self
            .find_row(REQUESTS, "H", &id.0)?
            .ok_or(StoreError::NotFound)?;
        self.update_cell(REQUESTS, &format!("G{row}"), json!(status.label()))
    }

    fn update_lead_details(&self, id: &LeadId, details: &LeadDetails) -> Result<(), StoreError> {
        let (row, _) = self
            .find_row(REQUESTS, "H", &id.0)?
            .ok_or(StoreError::NotFound)?;
        self.update_cell(REQUESTS, &format!("C{row}"), json!(details.region))?;
        self.update_cell(REQUESTS, &format!("D{row}"), json!(details.rooms))?;
        self.update_cell(REQUESTS, &format!("E{row}"), json!(details.price_range))
    }

    fn insert_purchase(&self, purchase: Purchase) -> Result<(), StoreError> {
        self.append_row(
            TRANSACTIONS,
            vec![
                json!(purchase.id.0),
                json!(purchase.agent_id.to_string()),
                json!(purchase.lead_id.0),
                json!(purchase.amount.to_string()),
                json!(purchase.created_at.to_rfc3339()),
            ],
        )
    }

    fn purchase_for(&self, agent: AgentId, lead: &LeadId) -> Result<Option<Purchase>, StoreError> {
        let agent_key = agent.to_string();
        for row in self.rows(TRANSACTIONS, "E")? {
            if cell_str(&row, 1) == agent_key && cell_str(&row, 2) == lead.0 {
                return decode_purchase(&row).map(Some);
            }
        }
        Ok(None)
    }

    fn counts(&self) -> Result<CollectionCounts, StoreError> {
        let non_empty = |rows: &[Vec<Value>]| {
            rows.iter()
                .filter(|row| !cell_str(row, 0).is_empty())
                .count()
        };
        Ok(CollectionCounts {
            leads: non_empty(&self.rows(REQUESTS, "H")?),
            purchases: non_empty(&self.rows(TRANSACTIONS, "E")?),
            agents: non_empty(&self.rows(REALTORS, "G")?),
        })
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Remote
    }
}

/// Pull the spreadsheet id out of a `…/spreadsheets/d/<id>/…` URL; a bare id
/// is accepted as-is.
pub fn spreadsheet_id_from_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if let Some(rest) = url.split_once("/d/").map(|(_, rest)| rest) {
        let id: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .collect();
        return (!id.is_empty()).then_some(id);
    }
    if url.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_')) {
        return Some(url.to_string());
    }
    None
}

fn cell_str(row: &[Value], idx: usize) -> String {
    match row.get(idx) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Money cells decode strictly: a balance or amount that fails to parse is a
/// malformed record, never a silent zero a later write could persist.
fn cell_u64(row: &[Value], idx: usize, field: &str) -> Result<u64, StoreError> {
    let raw = cell_str(row, idx);
    raw.parse()
        .map_err(|_| StoreError::Malformed(format!("bad {field}: {raw:?}")))
}

fn cell_timestamp(row: &[Value], idx: usize) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&cell_str(row, idx))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn decode_agent(row: &[Value]) -> Result<Agent, StoreError> {
    let raw_id = cell_str(row, 0);
    let id = raw_id
        .parse::<i64>()
        .map_err(|_| StoreError::Malformed(format!("bad realtor id: {raw_id:?}")))?;
    let raw_type = cell_str(row, 3);
    let deal_type = DealType::parse(&raw_type)
        .ok_or_else(|| StoreError::Malformed(format!("bad realtor type: {raw_type:?}")))?;
    Ok(Agent {
        id: AgentId(id),
        display_name: cell_str(row, 1),
        region: cell_str(row, 2).to_lowercase(),
        deal_type,
        phone: cell_str(row, 4),
        balance: cell_u64(row, 5, "realtor balance")?,
        registered_at: cell_timestamp(row, 6),
    })
}

fn decode_lead(row: &[Value]) -> Result<Lead, StoreError> {
    let raw_type = cell_str(row, 1);
    let deal_type = DealType::parse(&raw_type)
        .ok_or_else(|| StoreError::Malformed(format!("bad request type: {raw_type:?}")))?;
    let raw_status = cell_str(row, 6);
    let status = LeadStatus::parse(&raw_status)
        .ok_or_else(|| StoreError::Malformed(format!("bad request status: {raw_status:?}")))?;
    Ok(Lead {
        id: LeadId(cell_str(row, 0)),
        deal_type,
        region: cell_str(row, 2),
        rooms: cell_str(row, 3),
        price_range: cell_str(row, 4),
        client_phone: cell_str(row, 5),
        status,
        created_at: cell_timestamp(row, 7),
    })
}

fn decode_purchase(row: &[Value]) -> Result<Purchase, StoreError> {
    let raw_agent = cell_str(row, 1);
    let agent_id = raw_agent
        .parse::<i64>()
        .map_err(|_| StoreError::Malformed(format!("bad transaction realtor id: {raw_agent:?}")))?;
    Ok(Purchase {
        id: PurchaseId(cell_str(row, 0)),
        agent_id: AgentId(agent_id),
        lead_id: LeadId(cell_str(row, 2)),
        amount: cell_u64(row, 3, "transaction amount")?,
        created_at: cell_timestamp(row, 4),
    })
}
