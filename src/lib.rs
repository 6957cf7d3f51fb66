/*!
# cabtrack

Installation progress tracking for electrical contracts, built in Rust.

## Overview

A project (job) carries a price book of components, templates that group
components into standard equipment types, the equipment list itself, a
cable schedule and the change/completion certificates (CCs) raised against
equipment. Site progress is entered as a percentage against any row of the
progress grid; the recovered labour hours follow from the row's labour
norm, and roll up to equipment, section and project totals.

## Architecture

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Store - Projects and their lists, with unique and reference constraints
  - Completion - Percent to recovered hours, row ids, roll-ups
  - Import - Spreadsheet upload checks and bulk create
  - Export - Components, templates, equipment and cables to XLSX/CSV

### Client Layer
- `ProjectStore` caches a project's lists, runs imports against the cache
  and sends one completion update per selected grid row.

### Data Persistence Layer
- Whole-store snapshot with bincode serialization and gzip compression,
  written after every change

## Modules

- **model**: Projects, components, templates, equipment, cables, CCs, grid rows
- **validation**: Field rules shared by the store and the importers
- **store**: In-memory database and every mutation on it
- **completion**: Recovery arithmetic and progress row ids
- **loader**: `.xlsx`/CSV uploads into header plus rows
- **import**: Row checks, duplicate and reference reconciliation
- **downloader**: Export tables, CSV and XLSX writers
- **saving**: Snapshot persistence
- **config**: Server settings from environment and arguments
- **error**: Store errors and the JSON API error body
- **app**: Routing and handlers (feature `web`)
- **client**: REST client and project store (feature `client`)

## REST API Endpoints

All under `/api/projects/{job_no}`:

- `components`, `templates`, `equipment`, `cabscheds` - list, create, `bulk` create,
  update and delete by key
- `equipment/{ref}/percent`, `cabscheds/{cab_num}/percent` - spread a percentage
- `ccs` - CRUD plus `{cc_ref}/lift` and `{cc_ref}/unlift`
- `progress` - grid rows; `progress/{kind}/{id}` writes one row
- `import/{kind}` - multipart spreadsheet upload
- `export/{kind}?format=xlsx|csv` - download a list
- `summary` - totals by section
*/

pub mod completion;
pub mod config;
pub mod downloader;
pub mod error;
pub mod import;
pub mod loader;
pub mod model;
pub mod saving;
pub mod store;
pub mod validation;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "client")]
pub mod client;

pub use config::Config;
pub use error::{ApiError, ErrorCode, StoreError};
pub use import::ImportReport;
pub use model::*;
pub use store::{Database, ProjectData};
