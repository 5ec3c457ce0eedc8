use async_trait::async_trait;
use google_sheets4::api::{
    AddSheetRequest, AppendDimensionRequest, BatchUpdateSpreadsheetRequest, ClearValuesRequest,
    GridProperties, Request, Scope, SheetProperties, Spreadsheet, SpreadsheetProperties,
    ValueRange,
};
use tracing::{debug, info, warn};

use crate::auth::{create_sheets_hub, SheetsHub};
use crate::cfg::SheetsConfig;
use crate::error::{SyncError, SyncResult};
use crate::health::ConnectionHealth;
use crate::metadata::{SyncMetadata, METADATA_WORKSHEET};
use crate::state::{load_registry, save_registry};
use crate::transform::SheetRow;

/// A worksheet inside the open spreadsheet, with its current grid size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worksheet {
    pub sheet_id: i32,
    pub title: String,
    pub rows: u32,
    pub cols: u32,
}

/// Destination spreadsheet session.
#[async_trait]
pub trait SheetStore: Send + Sync {
    async fn health(&self) -> ConnectionHealth;

    /// Authenticates and opens (or creates) the configured spreadsheet.
    async fn connect(&mut self) -> SyncResult<()>;

    /// Returns the worksheet called `name`, creating it at `rows` × `cols`
    /// if missing and growing it if smaller. Never shrinks.
    async fn ensure_worksheet(&mut self, name: &str, rows: u32, cols: u32) -> SyncResult<Worksheet>;

    /// Clears every value in `worksheet`, then writes `rows` from A1.
    ///
    /// Not atomic: a failure after the clear leaves the worksheet empty.
    async fn overwrite(&mut self, worksheet: &Worksheet, rows: &[SheetRow]) -> SyncResult<()>;

    fn spreadsheet_url(&self) -> Option<String>;

    async fn write_metadata(&mut self, metadata: &SyncMetadata) -> SyncResult<()> {
        let rows = metadata.to_rows();
        let height = u32::try_from(rows.len()).unwrap_or(u32::MAX).max(10);
        let worksheet = self.ensure_worksheet(METADATA_WORKSHEET, height, 3).await?;
        self.overwrite(&worksheet, &rows).await
    }
}

/// A1 reference for a whole worksheet; titles are always quoted.
pub fn sheet_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

struct OpenSpreadsheet {
    id: String,
    url: Option<String>,
}

/// [`SheetStore`] backed by the Google Sheets v4 API.
pub struct GoogleSheetStore {
    config: SheetsConfig,
    hub: Option<SheetsHub>,
    spreadsheet: Option<OpenSpreadsheet>,
}

impl GoogleSheetStore {
    pub fn new(config: SheetsConfig) -> Self {
        Self {
            config,
            hub: None,
            spreadsheet: None,
        }
    }

    fn session(&self) -> SyncResult<(&SheetsHub, &str)> {
        match (&self.hub, &self.spreadsheet) {
            (Some(hub), Some(spreadsheet)) => Ok((hub, spreadsheet.id.as_str())),
            _ => Err(SyncError::Connection(
                "spreadsheet session is not open".to_string(),
            )),
        }
    }

    async fn open_or_create(&self, hub: &SheetsHub) -> SyncResult<OpenSpreadsheet> {
        let name = &self.config.spreadsheet_name;

        if let Some(id) = &self.config.spreadsheet_id {
            let opened = fetch_spreadsheet(hub, id)
                .await
                .map_err(|e| classify(e, SyncError::Connection))?;
            info!("Connected to spreadsheet '{}' by id", name);
            return Ok(opened);
        }

        let mut registry = load_registry(&self.config.state_path)
            .map_err(|e| SyncError::Config(e.to_string()))?;

        if let Some(known) = registry.lookup(name) {
            match fetch_spreadsheet(hub, &known.spreadsheet_id).await {
                Ok(opened) => {
                    info!("Connected to existing spreadsheet '{}'", name);
                    return Ok(opened);
                }
                Err(e) if status_of(&e) == Some(404) => {
                    warn!(
                        "Remembered spreadsheet {} for '{}' no longer exists, creating a new one",
                        known.spreadsheet_id, name
                    );
                    registry.forget(name);
                }
                Err(e) => return Err(classify(e, SyncError::Connection)),
            }
        }

        let request = Spreadsheet {
            properties: Some(SpreadsheetProperties {
                title: Some(name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (_, created) = hub
            .spreadsheets()
            .create(request)
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| classify(e, SyncError::Connection))?;
        let opened = open_spreadsheet(created)?;
        info!("Created new spreadsheet '{}'", name);

        registry.remember(name, &opened.id, opened.url.clone());
        if let Err(e) = save_registry(&self.config.state_path, &registry) {
            warn!(
                "Could not record spreadsheet id {} for '{}': {}; the next run will create another",
                opened.id, name, e
            );
        }
        Ok(opened)
    }

    async fn grow(&self, worksheet: &Worksheet, rows: u32, cols: u32) -> SyncResult<Worksheet> {
        let (hub, id) = self.session()?;

        let mut requests = Vec::new();
        if rows > worksheet.rows {
            requests.push(append_dimension(worksheet.sheet_id, "ROWS", rows - worksheet.rows));
        }
        if cols > worksheet.cols {
            requests.push(append_dimension(worksheet.sheet_id, "COLUMNS", cols - worksheet.cols));
        }
        if requests.is_empty() {
            return Ok(worksheet.clone());
        }

        info!(
            "Growing worksheet '{}' from {}x{} to {}x{}",
            worksheet.title,
            worksheet.rows,
            worksheet.cols,
            rows.max(worksheet.rows),
            cols.max(worksheet.cols)
        );
        hub.spreadsheets()
            .batch_update(
                BatchUpdateSpreadsheetRequest {
                    requests: Some(requests),
                    ..Default::default()
                },
                id,
            )
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| classify(e, SyncError::Write))?;

        Ok(Worksheet {
            rows: rows.max(worksheet.rows),
            cols: cols.max(worksheet.cols),
            ..worksheet.clone()
        })
    }
}

#[async_trait]
impl SheetStore for GoogleSheetStore {
    async fn health(&self) -> ConnectionHealth {
        let Ok((hub, id)) = self.session() else {
            return ConnectionHealth::Absent;
        };
        match hub
            .spreadsheets()
            .get(id)
            .param("fields", "spreadsheetId")
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
        {
            Ok(_) => ConnectionHealth::Healthy,
            Err(e) => {
                debug!("Spreadsheet health probe failed: {}", e);
                ConnectionHealth::Stale
            }
        }
    }

    async fn connect(&mut self) -> SyncResult<()> {
        self.hub = None;
        self.spreadsheet = None;

        let hub = create_sheets_hub(&self.config).await?;
        let spreadsheet = self.open_or_create(&hub).await?;
        if let Some(url) = &spreadsheet.url {
            info!("Spreadsheet URL: {}", url);
        }

        self.hub = Some(hub);
        self.spreadsheet = Some(spreadsheet);
        Ok(())
    }

    async fn ensure_worksheet(&mut self, name: &str, rows: u32, cols: u32) -> SyncResult<Worksheet> {
        let (hub, id) = self.session()?;

        let (_, spreadsheet) = hub
            .spreadsheets()
            .get(id)
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| classify(e, SyncError::Connection))?;

        let existing = spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|sheet| sheet.properties)
            .find(|props| props.title.as_deref() == Some(name));

        if let Some(props) = existing {
            let worksheet = worksheet_from(props, name);
            debug!("Using existing worksheet '{}'", name);
            return self.grow(&worksheet, rows, cols).await;
        }

        let request = BatchUpdateSpreadsheetRequest {
            requests: Some(vec![Request {
                add_sheet: Some(AddSheetRequest {
                    properties: Some(SheetProperties {
                        title: Some(name.to_string()),
                        grid_properties: Some(GridProperties {
                            row_count: Some(to_i32(rows)),
                            column_count: Some(to_i32(cols)),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let (_, response) = hub
            .spreadsheets()
            .batch_update(request, id)
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| classify(e, SyncError::Write))?;

        let props = response
            .replies
            .unwrap_or_default()
            .into_iter()
            .find_map(|reply| reply.add_sheet.and_then(|added| added.properties))
            .ok_or_else(|| {
                SyncError::Write(format!("creating worksheet '{}' returned no properties", name))
            })?;

        info!("Created new worksheet '{}'", name);
        Ok(worksheet_from(props, name))
    }

    async fn overwrite(&mut self, worksheet: &Worksheet, rows: &[SheetRow]) -> SyncResult<()> {
        let (hub, id) = self.session()?;
        let range = sheet_range(&worksheet.title);

        hub.spreadsheets()
            .values_clear(ClearValuesRequest::default(), id, &range)
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| classify(e, SyncError::Write))?;
        debug!("Cleared worksheet '{}'", worksheet.title);

        if rows.is_empty() {
            return Ok(());
        }

        let start = format!("{}!A1", range);
        let values: Vec<Vec<serde_json::Value>> = rows
            .iter()
            .map(|row| row.iter().cloned().map(serde_json::Value::String).collect())
            .collect();
        let body = ValueRange {
            range: Some(start.clone()),
            major_dimension: Some("ROWS".to_string()),
            values: Some(values),
            ..Default::default()
        };
        hub.spreadsheets()
            .values_update(body, id, &start)
            .value_input_option("RAW")
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| classify(e, SyncError::Write))?;

        info!("Wrote {} rows to worksheet '{}'", rows.len(), worksheet.title);
        Ok(())
    }

    fn spreadsheet_url(&self) -> Option<String> {
        self.spreadsheet.as_ref().and_then(|s| s.url.clone())
    }
}

async fn fetch_spreadsheet(hub: &SheetsHub, id: &str) -> google_sheets4::Result<OpenSpreadsheet> {
    let (_, spreadsheet) = hub
        .spreadsheets()
        .get(id)
        .param("fields", "spreadsheetId,spreadsheetUrl")
        .add_scope(Scope::Spreadsheet)
        .doit()
        .await?;
    Ok(OpenSpreadsheet {
        id: spreadsheet.spreadsheet_id.unwrap_or_else(|| id.to_string()),
        url: spreadsheet.spreadsheet_url,
    })
}

fn open_spreadsheet(spreadsheet: Spreadsheet) -> SyncResult<OpenSpreadsheet> {
    let id = spreadsheet.spreadsheet_id.ok_or_else(|| {
        SyncError::Connection("created spreadsheet has no id".to_string())
    })?;
    Ok(OpenSpreadsheet {
        id,
        url: spreadsheet.spreadsheet_url,
    })
}

fn worksheet_from(props: SheetProperties, name: &str) -> Worksheet {
    let grid = props.grid_properties.unwrap_or_default();
    Worksheet {
        sheet_id: props.sheet_id.unwrap_or_default(),
        title: props.title.unwrap_or_else(|| name.to_string()),
        rows: grid.row_count.map(to_u32).unwrap_or_default(),
        cols: grid.column_count.map(to_u32).unwrap_or_default(),
    }
}

fn append_dimension(sheet_id: i32, dimension: &str, length: u32) -> Request {
    Request {
        append_dimension: Some(AppendDimensionRequest {
            sheet_id: Some(sheet_id),
            dimension: Some(dimension.to_string()),
            length: Some(to_i32(length)),
        }),
        ..Default::default()
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_u32(n: i32) -> u32 {
    u32::try_from(n).unwrap_or_default()
}

/// HTTP status carried by an API error, if any.
fn status_of(e: &google_sheets4::Error) -> Option<u16> {
    match e {
        google_sheets4::Error::BadRequest(body) => body
            .get("error")
            .and_then(|err| err.get("code"))
            .and_then(|code| code.as_u64())
            .and_then(|code| u16::try_from(code).ok()),
        google_sheets4::Error::Failure(response) => Some(response.status().as_u16()),
        _ => None,
    }
}

/// Maps an API error onto the sync taxonomy; `fallback` names the failure
/// when it is neither a transport nor a credential problem.
fn classify(e: google_sheets4::Error, fallback: fn(String) -> SyncError) -> SyncError {
    let status = status_of(&e);
    match e {
        google_sheets4::Error::MissingToken(err) => SyncError::Auth(err.to_string()),
        google_sheets4::Error::HttpError(err) => SyncError::Connection(err.to_string()),
        other if matches!(status, Some(401) | Some(403)) => SyncError::Auth(other.to_string()),
        other => fallback(other.to_string()),
    }
}
