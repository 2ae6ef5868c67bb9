//! WebDAV transport client.

mod client;

pub use client::{
    Depth, HeadResponse, PutResponse, ResourceInfo, WebDAVClient, WebDAVError,
};
