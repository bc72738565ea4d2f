use actix_web::web;

pub mod messages;
pub mod wsroute;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(messages::send_message)
        .service(messages::get_conversations)
        .service(messages::get_messages)
        .service(messages::clear_conversation)
        .service(wsroute::ws_handler);
}
