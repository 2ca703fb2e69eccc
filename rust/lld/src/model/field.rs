/*
 * Copyright 2025 Carver Automation Corporation.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Item columns and the policy that drives expansion, diffing, validation and
//! persistence of each one.

use crate::expand::MacroContext;
use std::fmt;

/// How a column is rendered in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Int,
    /// Foreign key where `0` means NULL.
    NullableId,
}

/// How a prototype value becomes an item value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// Copied from the prototype as is.
    Verbatim,
    Macros(MacroContext),
    /// Formula context for calculated items, plain macros otherwise.
    Params,
    /// JSON or XML escaping depending on the item's post type.
    Posts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    pub column: &'static str,
    pub kind: ColumnKind,
    pub expansion: Expansion,
    /// Strip leading and trailing whitespace after expansion.
    pub trim: bool,
    /// Maximum length in characters. Fields with a limit are validated.
    pub max_len: Option<usize>,
}

const fn text(column: &'static str, ctx: MacroContext, trim: bool, max: usize) -> FieldPolicy {
    FieldPolicy {
        column,
        kind: ColumnKind::Text,
        expansion: Expansion::Macros(ctx),
        trim,
        max_len: Some(max),
    }
}

const fn verbatim(column: &'static str, kind: ColumnKind) -> FieldPolicy {
    FieldPolicy {
        column,
        kind,
        expansion: Expansion::Verbatim,
        trim: false,
        max_len: None,
    }
}

const TEXT_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemField {
    Name,
    Key,
    Type,
    ValueType,
    Delay,
    History,
    Trends,
    TrapperHosts,
    Units,
    Logtimefmt,
    Valuemapid,
    Params,
    IpmiSensor,
    SnmpCommunity,
    SnmpOid,
    Port,
    Snmpv3Securityname,
    Snmpv3Securitylevel,
    Snmpv3Authprotocol,
    Snmpv3Authpassphrase,
    Snmpv3Privprotocol,
    Snmpv3Privpassphrase,
    Snmpv3Contextname,
    Authtype,
    Username,
    Password,
    Publickey,
    Privatekey,
    Description,
    Interfaceid,
    JmxEndpoint,
    Timeout,
    Url,
    QueryFields,
    Posts,
    StatusCodes,
    FollowRedirects,
    PostType,
    HttpProxy,
    Headers,
    RetrieveMode,
    RequestMethod,
    OutputFormat,
    SslCertFile,
    SslKeyFile,
    SslKeyPassword,
    VerifyPeer,
    VerifyHost,
    AllowTraps,
}

impl ItemField {
    pub const ALL: [ItemField; 49] = [
        ItemField::Name,
        ItemField::Key,
        ItemField::Type,
        ItemField::ValueType,
        ItemField::Delay,
        ItemField::History,
        ItemField::Trends,
        ItemField::TrapperHosts,
        ItemField::Units,
        ItemField::Logtimefmt,
        ItemField::Valuemapid,
        ItemField::Params,
        ItemField::IpmiSensor,
        ItemField::SnmpCommunity,
        ItemField::SnmpOid,
        ItemField::Port,
        ItemField::Snmpv3Securityname,
        ItemField::Snmpv3Securitylevel,
        ItemField::Snmpv3Authprotocol,
        ItemField::Snmpv3Authpassphrase,
        ItemField::Snmpv3Privprotocol,
        ItemField::Snmpv3Privpassphrase,
        ItemField::Snmpv3Contextname,
        ItemField::Authtype,
        ItemField::Username,
        ItemField::Password,
        ItemField::Publickey,
        ItemField::Privatekey,
        ItemField::Description,
        ItemField::Interfaceid,
        ItemField::JmxEndpoint,
        ItemField::Timeout,
        ItemField::Url,
        ItemField::QueryFields,
        ItemField::Posts,
        ItemField::StatusCodes,
        ItemField::FollowRedirects,
        ItemField::PostType,
        ItemField::HttpProxy,
        ItemField::Headers,
        ItemField::RetrieveMode,
        ItemField::RequestMethod,
        ItemField::OutputFormat,
        ItemField::SslCertFile,
        ItemField::SslKeyFile,
        ItemField::SslKeyPassword,
        ItemField::VerifyPeer,
        ItemField::VerifyHost,
        ItemField::AllowTraps,
    ];

    pub const fn policy(self) -> FieldPolicy {
        use ColumnKind::{Int, NullableId, Text};
        use MacroContext::{Any, Json, Key, SnmpOid};

        match self {
            ItemField::Name => text("name", Any, true, 255),
            ItemField::Key => text("key_", Key, true, 255),
            ItemField::Type => verbatim("type", Int),
            ItemField::ValueType => verbatim("value_type", Int),
            ItemField::Delay => text("delay", Any, true, 1024),
            ItemField::History => text("history", Any, true, 255),
            ItemField::Trends => text("trends", Any, true, 255),
            ItemField::TrapperHosts => verbatim("trapper_hosts", Text),
            ItemField::Units => text("units", Any, true, 255),
            ItemField::Logtimefmt => verbatim("logtimefmt", Text),
            ItemField::Valuemapid => verbatim("valuemapid", NullableId),
            ItemField::Params => FieldPolicy {
                column: "params",
                kind: Text,
                expansion: Expansion::Params,
                trim: true,
                max_len: Some(TEXT_LEN),
            },
            ItemField::IpmiSensor => text("ipmi_sensor", Any, false, 128),
            ItemField::SnmpCommunity => text("snmp_community", Any, true, 64),
            ItemField::SnmpOid => text("snmp_oid", SnmpOid, true, 512),
            ItemField::Port => text("port", Any, true, 64),
            ItemField::Snmpv3Securityname => text("snmpv3_securityname", Any, true, 64),
            ItemField::Snmpv3Securitylevel => verbatim("snmpv3_securitylevel", Int),
            ItemField::Snmpv3Authprotocol => verbatim("snmpv3_authprotocol", Int),
            ItemField::Snmpv3Authpassphrase => text("snmpv3_authpassphrase", Any, false, 64),
            ItemField::Snmpv3Privprotocol => verbatim("snmpv3_privprotocol", Int),
            ItemField::Snmpv3Privpassphrase => text("snmpv3_privpassphrase", Any, false, 64),
            ItemField::Snmpv3Contextname => text("snmpv3_contextname", Any, true, 255),
            ItemField::Authtype => verbatim("authtype", Int),
            ItemField::Username => text("username", Any, false, 64),
            ItemField::Password => text("password", Any, false, 64),
            ItemField::Publickey => text("publickey", Any, true, 64),
            ItemField::Privatekey => text("privatekey", Any, true, 64),
            ItemField::Description => text("description", Any, true, TEXT_LEN),
            ItemField::Interfaceid => verbatim("interfaceid", NullableId),
            ItemField::JmxEndpoint => text("jmx_endpoint", Any, true, 255),
            ItemField::Timeout => text("timeout", Any, true, 255),
            ItemField::Url => text("url", Any, true, 2048),
            ItemField::QueryFields => text("query_fields", Json, true, 2048),
            ItemField::Posts => FieldPolicy {
                column: "posts",
                kind: Text,
                expansion: Expansion::Posts,
                trim: false,
                max_len: Some(TEXT_LEN),
            },
            ItemField::StatusCodes => text("status_codes", Any, true, 255),
            ItemField::FollowRedirects => verbatim("follow_redirects", Int),
            ItemField::PostType => verbatim("post_type", Int),
            ItemField::HttpProxy => text("http_proxy", Any, true, 255),
            ItemField::Headers => text("headers", Any, false, TEXT_LEN),
            ItemField::RetrieveMode => verbatim("retrieve_mode", Int),
            ItemField::RequestMethod => verbatim("request_method", Int),
            ItemField::OutputFormat => verbatim("output_format", Int),
            ItemField::SslCertFile => text("ssl_cert_file", Any, false, 255),
            ItemField::SslKeyFile => text("ssl_key_file", Any, false, 255),
            ItemField::SslKeyPassword => text("ssl_key_password", Any, false, 64),
            ItemField::VerifyPeer => verbatim("verify_peer", Int),
            ItemField::VerifyHost => verbatim("verify_host", Int),
            ItemField::AllowTraps => verbatim("allow_traps", Int),
        }
    }

    pub const fn column(self) -> &'static str {
        self.policy().column
    }

    /// Comma separated column list in [`ItemField::ALL`] order, prefixed.
    pub fn select_list(prefix: &str) -> String {
        Self::ALL
            .iter()
            .map(|field| format!("{prefix}{}", field.column()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for ItemField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Item types as stored in the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Agent,
    SnmpV1,
    Trapper,
    Simple,
    SnmpV2c,
    Internal,
    SnmpV3,
    AgentActive,
    Aggregate,
    HttpTest,
    External,
    DbMonitor,
    Ipmi,
    Ssh,
    Telnet,
    Calculated,
    Jmx,
    SnmpTrap,
    Dependent,
    HttpAgent,
}

impl ItemType {
    pub fn from_code(code: &str) -> Option<Self> {
        let code: i32 = code.trim().parse().ok()?;
        Some(match code {
            0 => ItemType::Agent,
            1 => ItemType::SnmpV1,
            2 => ItemType::Trapper,
            3 => ItemType::Simple,
            4 => ItemType::SnmpV2c,
            5 => ItemType::Internal,
            6 => ItemType::SnmpV3,
            7 => ItemType::AgentActive,
            8 => ItemType::Aggregate,
            9 => ItemType::HttpTest,
            10 => ItemType::External,
            11 => ItemType::DbMonitor,
            12 => ItemType::Ipmi,
            13 => ItemType::Ssh,
            14 => ItemType::Telnet,
            15 => ItemType::Calculated,
            16 => ItemType::Jmx,
            17 => ItemType::SnmpTrap,
            18 => ItemType::Dependent,
            19 => ItemType::HttpAgent,
            _ => return None,
        })
    }

    /// Trapper, SNMP trap and dependent items never poll on a schedule.
    pub fn polls_on_schedule(self) -> bool {
        !matches!(
            self,
            ItemType::Trapper | ItemType::SnmpTrap | ItemType::Dependent
        )
    }
}

/// HTTP agent request body types (`post_type`).
pub const POST_TYPE_JSON: &str = "2";
pub const POST_TYPE_XML: &str = "3";

/// Strips the characters the server treats as whitespace.
pub fn trim_whitespace(value: &str) -> &str {
    value.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}
